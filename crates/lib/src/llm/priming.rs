//! Fixed example exchange sent ahead of every user message to steer the reply style.

use super::Content;

static PRIMING_USER: &str = include_str!("../../config/priming/user.md");
static PRIMING_MODEL: &str = include_str!("../../config/priming/model.md");

/// One user turn and one model turn.
pub fn priming_history() -> Vec<Content> {
    vec![
        Content::user(PRIMING_USER.trim()),
        Content::model(PRIMING_MODEL),
    ]
}
