//! Detach directive parsing.

use agent_courier::orchestrator::directive::{
    parse_detach, DetachCommand, DetachParse, DetachSpec, DEFAULT_TITLE, MISSING_CMD,
    MISSING_OBJECT,
};

#[test]
fn plain_reply_has_no_directive() {
    assert_eq!(parse_detach("All done, tests pass."), DetachParse::Absent);
    assert_eq!(parse_detach(""), DetachParse::Absent);
}

#[test]
fn sentinel_mentioned_inline_is_not_a_directive() {
    let reply = "I could use TG_COURIER_TOOL: DETACH here but will not.";
    assert_eq!(parse_detach(reply), DetachParse::Absent);
}

#[test]
fn well_formed_directive_with_shell_command() {
    let reply = "TG_COURIER_TOOL: DETACH\n{\"title\":\"build\",\"cmd\":\"make\",\"cwd\":\".\"}";
    assert_eq!(
        parse_detach(reply),
        DetachParse::Directive {
            spec: DetachSpec {
                title: "build".into(),
                cmd: DetachCommand::Shell("make".into()),
                cwd: Some(".".into()),
            },
            remainder: String::new(),
        }
    );
}

#[test]
fn argv_command_is_kept_as_list() {
    let reply = "TG_COURIER_TOOL: DETACH\n{\"cmd\":[\"cargo\",\"test\",\"--all\"]}";
    let DetachParse::Directive { spec, .. } = parse_detach(reply) else {
        panic!("expected directive");
    };
    assert_eq!(
        spec.cmd,
        DetachCommand::Argv(vec!["cargo".into(), "test".into(), "--all".into()])
    );
    assert_eq!(spec.title, DEFAULT_TITLE);
    assert_eq!(spec.cwd, None);
}

#[test]
fn sentinel_is_case_insensitive_and_trimmed() {
    let reply = "   tg_courier_tool: detach  \n\n  {\"cmd\":\"sleep 60\"}  ";
    assert!(matches!(parse_detach(reply), DetachParse::Directive { .. }));
}

#[test]
fn surrounding_text_becomes_remainder() {
    let reply = "Starting the long build now.\nTG_COURIER_TOOL: DETACH\n{\"title\":\"build\",\"cmd\":\"make\"}\nI'll report back.";
    let DetachParse::Directive { remainder, .. } = parse_detach(reply) else {
        panic!("expected directive");
    };
    assert_eq!(remainder, "Starting the long build now.\nI'll report back.");
}

#[test]
fn blank_title_and_cwd_fall_back() {
    let reply = "TG_COURIER_TOOL: DETACH\n{\"title\":\"  \",\"cmd\":\"make\",\"cwd\":\"\"}";
    let DetachParse::Directive { spec, .. } = parse_detach(reply) else {
        panic!("expected directive");
    };
    assert_eq!(spec.title, DEFAULT_TITLE);
    assert_eq!(spec.cwd, None);
}

#[test]
fn missing_cmd_is_malformed() {
    let reply = "TG_COURIER_TOOL: DETACH\n{\"title\":\"build\"}";
    assert_eq!(parse_detach(reply), DetachParse::Malformed(MISSING_CMD.into()));
}

#[test]
fn invalid_cmd_types_are_malformed() {
    for payload in [
        "{\"cmd\":42}",
        "{\"cmd\":\"   \"}",
        "{\"cmd\":[]}",
        "{\"cmd\":[\"ok\", 1]}",
        "{\"cmd\":[\"ok\", \"\"]}",
    ] {
        let reply = format!("TG_COURIER_TOOL: DETACH\n{payload}");
        assert_eq!(
            parse_detach(&reply),
            DetachParse::Malformed(MISSING_CMD.into()),
            "payload {payload}"
        );
    }
}

#[test]
fn sentinel_without_json_is_malformed() {
    assert_eq!(
        parse_detach("TG_COURIER_TOOL: DETACH"),
        DetachParse::Malformed(MISSING_OBJECT.into())
    );
    assert_eq!(
        parse_detach("TG_COURIER_TOOL: DETACH\nnot json at all"),
        DetachParse::Malformed(MISSING_OBJECT.into())
    );
    assert_eq!(
        parse_detach("TG_COURIER_TOOL: DETACH\n[\"make\"]"),
        DetachParse::Malformed(MISSING_OBJECT.into())
    );
}
