//! Back-reference rewriting for renamed main files.

use crate::template::{embed, link};

/// Point every link and embed of `old_name` in `body` at `new_name`.
///
/// Names are matched literally, so characters like `(`, `[` or `*` in a
/// file name carry no special meaning. Text outside the two token forms is
/// left untouched, and a link whose target merely contains `old_name`
/// (`[[xa.png]]` for `a.png`) is not a match.
pub fn rewrite(body: &str, old_name: &str, new_name: &str) -> String {
    if old_name == new_name {
        return body.to_string();
    }

    body.replace(&embed(old_name), &embed(new_name))
        .replace(&link(old_name), &link(new_name))
}
