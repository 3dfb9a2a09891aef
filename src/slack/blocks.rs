//! Slack Block Kit message builders.

use slack_morphism::prelude::{
    SlackActionBlockElement, SlackActionsBlock, SlackBlock, SlackBlockButtonElement,
    SlackBlockId, SlackBlockPlainTextOnly, SlackBlockText, SlackSectionBlock,
};

use crate::transport::JobAction;

/// Build a markdown section block.
#[must_use]
pub fn text_section(text: &str) -> SlackBlock {
    SlackBlock::Section(SlackSectionBlock::new().with_text(SlackBlockText::MarkDown(text.into())))
}

/// Build an actions block with the given buttons.
#[must_use]
pub fn action_buttons(block_id: &str, buttons: &[&JobAction]) -> SlackBlock {
    let elements: Vec<SlackActionBlockElement> = buttons
        .iter()
        .map(|action| {
            let button = SlackBlockButtonElement::new(
                action.action_id.clone().into(),
                SlackBlockPlainTextOnly::from(action.label.as_str()),
            );
            // Slack rejects empty button values.
            if action.value.is_empty() {
                SlackActionBlockElement::Button(button)
            } else {
                SlackActionBlockElement::Button(button.with_value(action.value.clone()))
            }
        })
        .collect();
    SlackBlock::Actions(
        SlackActionsBlock::new(elements).with_block_id(SlackBlockId(block_id.into())),
    )
}

/// Group actions into blocks so no block repeats an `action_id`.
///
/// Slack requires action IDs to be unique within a block, and job buttons
/// share IDs across jobs (`bg_tail` for every job), so each repeat starts
/// a new row.
#[must_use]
pub fn job_action_blocks(actions: &[JobAction]) -> Vec<SlackBlock> {
    let mut rows: Vec<Vec<&JobAction>> = Vec::new();
    for action in actions {
        match rows.last_mut() {
            Some(row) if !row.iter().any(|a| a.action_id == action.action_id) => row.push(action),
            _ => rows.push(vec![action]),
        }
    }
    rows.iter()
        .enumerate()
        .map(|(index, row)| action_buttons(&format!("job_actions_{index}"), row))
        .collect()
}

/// Blocks for a message body followed by its buttons.
#[must_use]
pub fn message_with_actions(text: &str, actions: &[JobAction]) -> Vec<SlackBlock> {
    let mut blocks = vec![text_section(text)];
    blocks.extend(job_action_blocks(actions));
    blocks
}
