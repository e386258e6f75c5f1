use tracing::{debug, warn};

use crate::ext::one_line;
use crate::store::Node;

/// Renders the entries of `group` as `NAME=VALUE` lines in store order.
///
/// Values are written verbatim. A value with a line break or a name with `=`
/// produces a file that cannot be read back unambiguously, which is only
/// reported.
pub fn render_env_file(group: &Node) -> String {
    let mut contents = String::new();

    for entry in group.children() {
        let name = entry.name();
        let value = entry.value_or_empty();

        if entry.dir {
            debug!(
                "Entry '{}' of group '{}' is a directory, writing it without a value",
                one_line(name, false),
                one_line(group.name(), false)
            );
        }
        if name.contains('=') || value.contains(['\n', '\r']) {
            warn!(
                "Entry '{}' of group '{}' will not round-trip, value is '{}'",
                one_line(name, false),
                one_line(group.name(), false),
                one_line(value, false)
            );
        }

        contents.push_str(name);
        contents.push('=');
        contents.push_str(value);
        contents.push('\n');
    }

    contents
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_entries_in_store_order() {
        let group = Node::directory(
            "/conf/db",
            vec![
                Node::leaf("/conf/db/HOST", "localhost"),
                Node::leaf("/conf/db/PORT", "5432"),
            ],
        );
        assert_eq!(render_env_file(&group), "HOST=localhost\nPORT=5432\n");
    }

    #[test]
    fn empty_group_renders_empty_file() {
        let group = Node::directory("/conf/empty", vec![]);
        assert_eq!(render_env_file(&group), "");
    }

    #[test]
    fn nested_directory_entry_renders_empty_value() {
        let group = Node::directory(
            "/conf/app",
            vec![
                Node::directory("/conf/app/nested", vec![Node::leaf("/conf/app/nested/X", "1")]),
                Node::leaf("/conf/app/MODE", "prod"),
            ],
        );
        assert_eq!(render_env_file(&group), "nested=\nMODE=prod\n");
    }

    #[test]
    fn values_are_written_verbatim() {
        let group = Node::directory(
            "/conf/app",
            vec![
                Node::leaf("/conf/app/URL", "postgres://u:p@h/db?x=1"),
                Node::leaf("/conf/app/QUOTED", "\"spaced value\""),
                Node::leaf("/conf/app/MULTI", "a\nb"),
                Node::leaf("/conf/app/EMPTY", ""),
            ],
        );
        assert_eq!(
            render_env_file(&group),
            "URL=postgres://u:p@h/db?x=1\nQUOTED=\"spaced value\"\nMULTI=a\nb\nEMPTY=\n"
        );
    }
}
