//! Parse tree rewriting that routes every emitted value through the SQL
//! literal encoder.
//!
//! `{{.Name}}` becomes `{{.Name | sqlliteral}}` and `{{printf "%s" .}}`
//! becomes `{{printf "%s" . | sqlliteral}}`. Pipelines that only declare
//! or assign variables produce no output and are left alone, as are the
//! conditions of `if`, `range` and `with`.

use tracing::debug;

use crate::parse::{Arg, CommandNode, IdentifierNode, ListNode, Node, PipeNode, Tree};

/// Name under which the literal encoder is registered with templates.
pub const SQL_LITERAL: &str = "sqlliteral";

/// Rewrite `tree` so that every emitting pipeline ends in the encoder hook.
///
/// Running it again on an escaped tree changes nothing.
pub fn escape_tree(tree: &mut Tree) -> &mut Tree {
    let count = escape_list(&mut tree.root);
    debug!(template = %tree.name, pipelines = count, "escaped template");
    tree
}

fn escape_list(list: &mut ListNode) -> usize {
    list.nodes.iter_mut().map(escape_node).sum()
}

fn escape_node(node: &mut Node) -> usize {
    match node {
        Node::Action(action) => escape_pipe(&mut action.pipe),
        Node::If(branch) | Node::Range(branch) | Node::With(branch) => {
            let mut count = escape_list(&mut branch.list);
            if let Some(else_list) = &mut branch.else_list {
                count += escape_list(else_list);
            }
            count
        }
        Node::Text(_)
        | Node::Comment(_)
        | Node::Template(_)
        | Node::Break(_)
        | Node::Continue(_) => 0,
    }
}

fn escape_pipe(pipe: &mut PipeNode) -> usize {
    if !pipe.decl.is_empty() {
        return 0;
    }
    let Some(last) = pipe.cmds.last() else {
        return 0;
    };
    if last.is_bare_identifier(SQL_LITERAL) {
        return 0;
    }

    let pos = last.pos;
    pipe.cmds.push(CommandNode {
        pos,
        args: vec![Arg::Identifier(IdentifierNode::new(SQL_LITERAL, pos))],
    });
    1
}
