//! Template execution.
//!
//! Walks an escaped [`Tree`] against a data [`Value`] and writes the result.
//! Trees are only read; every execution carries its own variable stack, so
//! one set of trees can serve any number of concurrent executions.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::escape::SQL_LITERAL;
use crate::funcs::{builtins, FuncMap};
use crate::literal::Encoder;
use crate::parse::{
    Arg, BranchNode, CommandNode, ListNode, Node, PipeNode, Pos, TemplateNode, Tree,
    VariableNode,
};
use crate::value::Value;

/// Limit on nested `{{template}}` calls.
pub const MAX_EXEC_DEPTH: usize = 256;

/// What a field access on a map does when the key is absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingKey {
    /// Yield `Null`.
    #[default]
    Default,
    /// Same as `Default`.
    Invalid,
    /// Yield the zero value, which for template data is `Null`.
    Zero,
    /// Stop execution with an error.
    Error,
}

impl FromStr for MissingKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(MissingKey::Default),
            "invalid" => Ok(MissingKey::Invalid),
            "zero" => Ok(MissingKey::Zero),
            "error" => Ok(MissingKey::Error),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for MissingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MissingKey::Default => "default",
            MissingKey::Invalid => "invalid",
            MissingKey::Zero => "zero",
            MissingKey::Error => "error",
        })
    }
}

/// Everything an execution reads besides the data.
pub(crate) struct Env<'a> {
    pub trees: &'a BTreeMap<String, Arc<Tree>>,
    pub funcs: &'a FuncMap,
    pub encoder: &'a Encoder,
    pub missing_key: MissingKey,
}

/// Execute `tree` with `data` as both `.` and `$`.
pub(crate) fn execute(env: &Env<'_>, w: &mut dyn Write, tree: &Tree, data: &Value) -> Result<()> {
    let mut state = State {
        env,
        w,
        tree,
        vars: vec![("$".to_string(), data.clone())],
        depth: 0,
    };
    state.walk_list(data, &tree.root)?;
    Ok(())
}

/// How control leaves a list of nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Normal,
    Break,
    Continue,
}

struct State<'a, 'w> {
    env: &'a Env<'a>,
    w: &'w mut dyn Write,
    tree: &'a Tree,
    vars: Vec<(String, Value)>,
    depth: usize,
}

/// Node text used in error messages, shortened like `%.20s...`.
fn context(node: &dyn fmt::Display) -> String {
    let text = node.to_string();
    match text.char_indices().nth(20) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text,
    }
}

impl<'a> State<'a, '_> {
    fn error(&self, pos: Pos, node: &dyn fmt::Display, message: impl Into<String>) -> Error {
        Error::Exec {
            name: self.tree.name.clone(),
            line: pos.line,
            context: context(node),
            message: message.into(),
        }
    }

    fn push_var(&mut self, name: &str, value: Value) {
        self.vars.push((name.to_string(), value));
    }

    fn set_var(&mut self, pos: Pos, node: &VariableNode, value: Value) -> Result<()> {
        match self.vars.iter_mut().rev().find(|(n, _)| *n == node.name) {
            Some(slot) => {
                slot.1 = value;
                Ok(())
            }
            None => Err(self.error(pos, node, format!("undefined variable: {}", node.name))),
        }
    }

    fn var(&self, node: &VariableNode) -> Result<Value> {
        self.vars
            .iter()
            .rev()
            .find(|(n, _)| *n == node.name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| self.error(node.pos, node, format!("undefined variable: {}", node.name)))
    }

    fn walk_list(&mut self, dot: &Value, list: &'a ListNode) -> Result<Flow> {
        for node in &list.nodes {
            let flow = self.walk(dot, node)?;
            if flow != Flow::Normal {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn walk(&mut self, dot: &Value, node: &'a Node) -> Result<Flow> {
        match node {
            Node::Text(text) => self.w.write_all(text.text.as_bytes())?,
            Node::Comment(_) => {}
            Node::Action(action) => {
                // Declared variables stay visible until the enclosing control ends.
                let value = self.eval_pipeline(dot, &action.pipe)?;
                if action.pipe.decl.is_empty() {
                    write!(self.w, "{}", value)?;
                }
            }
            Node::If(branch) => return self.walk_if_or_with(dot, branch, false),
            Node::With(branch) => return self.walk_if_or_with(dot, branch, true),
            Node::Range(branch) => return self.walk_range(dot, branch),
            Node::Template(call) => self.walk_template(dot, call)?,
            Node::Break(_) => return Ok(Flow::Break),
            Node::Continue(_) => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    fn walk_if_or_with(&mut self, dot: &Value, branch: &'a BranchNode, with: bool) -> Result<Flow> {
        let mark = self.vars.len();
        let value = self.eval_pipeline(dot, &branch.pipe)?;
        let flow = if value.is_true() {
            if with {
                self.walk_list(&value, &branch.list)
            } else {
                self.walk_list(dot, &branch.list)
            }
        } else if let Some(else_list) = &branch.else_list {
            self.walk_list(dot, else_list)
        } else {
            Ok(Flow::Normal)
        };
        self.vars.truncate(mark);
        flow
    }

    fn walk_range(&mut self, dot: &Value, branch: &'a BranchNode) -> Result<Flow> {
        let mark = self.vars.len();
        let result = self.range_body(dot, branch);
        self.vars.truncate(mark);
        result
    }

    fn range_body(&mut self, dot: &Value, branch: &'a BranchNode) -> Result<Flow> {
        let pipe = &branch.pipe;
        let value = self.eval_commands(dot, pipe)?;

        let empty = match &value {
            Value::List(list) => list.is_empty(),
            Value::Map(map) => map.is_empty(),
            Value::Int(n) => *n <= 0,
            Value::Null => true,
            other => {
                return Err(self.error(
                    branch.pos,
                    pipe,
                    format!("range can't iterate over {}", other),
                ));
            }
        };

        if empty {
            if let Some(else_list) = &branch.else_list {
                self.walk_list(dot, else_list)?;
            }
            return Ok(Flow::Normal);
        }

        if !pipe.is_assign {
            for var in &pipe.decl {
                self.push_var(&var.name, Value::Null);
            }
        }

        // Items are produced one at a time so `break` ends the walk early.
        let items: Box<dyn Iterator<Item = (Value, Value)> + '_> = match &value {
            Value::List(list) => Box::new(
                list.iter()
                    .enumerate()
                    .map(|(i, v)| (Value::Int(i as i64), v.clone())),
            ),
            Value::Map(map) => Box::new(
                map.iter()
                    .map(|(k, v)| (Value::String(k.clone()), v.clone())),
            ),
            Value::Int(n) => Box::new((0..*n).map(|i| (Value::Int(i), Value::Int(i)))),
            _ => Box::new(std::iter::empty()),
        };
        for (index, elem) in items {
            match pipe.decl.as_slice() {
                [] => {}
                [only] => self.set_var(branch.pos, only, elem.clone())?,
                [first, second, ..] => {
                    self.set_var(branch.pos, first, index)?;
                    self.set_var(branch.pos, second, elem.clone())?;
                }
            }
            let mark = self.vars.len();
            let flow = self.walk_list(&elem, &branch.list)?;
            self.vars.truncate(mark);
            if flow == Flow::Break {
                break;
            }
        }
        Ok(Flow::Normal)
    }

    fn walk_template(&mut self, dot: &Value, call: &TemplateNode) -> Result<()> {
        let Some(tree) = self.env.trees.get(&call.name) else {
            return Err(self.error(
                call.pos,
                &Node::Template(call.clone()),
                format!("template: no such template {:?}", call.name),
            ));
        };
        if self.depth >= MAX_EXEC_DEPTH {
            return Err(self.error(
                call.pos,
                &Node::Template(call.clone()),
                format!("exceeded maximum template depth ({})", MAX_EXEC_DEPTH),
            ));
        }

        let new_dot = match &call.pipe {
            Some(pipe) => {
                let mark = self.vars.len();
                let value = self.eval_pipeline(dot, pipe);
                self.vars.truncate(mark);
                value?
            }
            None => Value::Null,
        };

        let mut inner = State {
            env: self.env,
            w: &mut *self.w,
            tree,
            vars: vec![("$".to_string(), new_dot.clone())],
            depth: self.depth + 1,
        };
        inner.walk_list(&new_dot, &tree.root)?;
        Ok(())
    }

    /// Evaluate a pipeline and bind its declared variables.
    fn eval_pipeline(&mut self, dot: &Value, pipe: &PipeNode) -> Result<Value> {
        let value = self.eval_commands(dot, pipe)?;
        for var in &pipe.decl {
            if pipe.is_assign {
                self.set_var(var.pos, var, value.clone())?;
            } else {
                self.push_var(&var.name, value.clone());
            }
        }
        Ok(value)
    }

    fn eval_commands(&mut self, dot: &Value, pipe: &PipeNode) -> Result<Value> {
        let mut value: Option<Value> = None;
        let mut prev: Option<&CommandNode> = None;
        for cmd in &pipe.cmds {
            value = Some(if cmd.is_bare_identifier(SQL_LITERAL) {
                let Some(input) = value.take() else {
                    return Err(self.error(
                        cmd.pos,
                        cmd,
                        format!("wrong number of args for {}: want 1 got 0", SQL_LITERAL),
                    ));
                };
                self.encode(prev.unwrap_or(cmd), &input)?
            } else {
                self.eval_command(dot, cmd, value.take())?
            });
            prev = Some(cmd);
        }
        Ok(value.unwrap_or_default())
    }

    /// Call the literal encoder on the value produced by `source`.
    fn encode(&self, source: &CommandNode, value: &Value) -> Result<Value> {
        match (self.env.encoder)(value) {
            Ok(raw) => Ok(Value::Raw(raw)),
            Err(source_err) => Err(Error::Encode {
                name: self.tree.name.clone(),
                line: source.pos.line,
                context: context(source),
                source: source_err,
            }),
        }
    }

    fn eval_command(&mut self, dot: &Value, cmd: &CommandNode, last: Option<Value>) -> Result<Value> {
        let Some(first) = cmd.args.first() else {
            return Err(self.error(cmd.pos, cmd, "empty command"));
        };
        let rest = &cmd.args[1..];

        match first {
            Arg::Field(field) => {
                self.eval_field_chain(dot.clone(), first, &field.idents, rest, last)
            }
            Arg::Chain(chain) => {
                if matches!(*chain.node, Arg::Nil(_)) {
                    return Err(self.error(
                        chain.pos,
                        first,
                        format!("indirection through explicit nil in {}", first),
                    ));
                }
                let receiver = self.eval_arg(dot, &chain.node)?;
                self.eval_field_chain(receiver, first, &chain.fields, rest, last)
            }
            Arg::Identifier(ident) => self.eval_function(dot, cmd, &ident.name, rest, last),
            Arg::Pipe(pipe) => {
                self.not_a_function(cmd, last.is_some())?;
                self.eval_pipeline(dot, pipe)
            }
            Arg::Variable(var) => {
                let value = self.var(var)?;
                if var.fields.is_empty() {
                    self.not_a_function(cmd, last.is_some())?;
                    return Ok(value);
                }
                self.eval_field_chain(value, first, &var.fields, rest, last)
            }
            Arg::Nil(pos) => Err(self.error(*pos, first, "nil is not a command")),
            Arg::Dot(_) | Arg::Bool(..) | Arg::Number(_) | Arg::String(_) => {
                self.not_a_function(cmd, last.is_some())?;
                self.eval_arg(dot, first)
            }
        }
    }

    fn not_a_function(&self, cmd: &CommandNode, has_final: bool) -> Result<()> {
        if cmd.args.len() > 1 || has_final {
            return Err(self.error(
                cmd.pos,
                cmd,
                format!("can't give argument to non-function {}", cmd.args[0]),
            ));
        }
        Ok(())
    }

    fn eval_field_chain(
        &self,
        receiver: Value,
        node: &Arg,
        idents: &[String],
        args: &[Arg],
        last: Option<Value>,
    ) -> Result<Value> {
        let has_args = !args.is_empty() || last.is_some();
        let Some((final_ident, path)) = idents.split_last() else {
            return Err(self.error(node.pos(), node, "internal error: no fields in field chain"));
        };
        let mut receiver = receiver;
        for ident in path {
            receiver = self.eval_field(node, ident, &receiver, false)?;
        }
        self.eval_field(node, final_ident, &receiver, has_args)
    }

    fn eval_field(&self, node: &Arg, name: &str, receiver: &Value, has_args: bool) -> Result<Value> {
        match receiver {
            Value::Map(map) => {
                if has_args {
                    return Err(self.error(
                        node.pos(),
                        node,
                        format!("{} is not a method but has arguments", name),
                    ));
                }
                match map.get(name) {
                    Some(value) => Ok(value.clone()),
                    None => match self.env.missing_key {
                        MissingKey::Default | MissingKey::Invalid | MissingKey::Zero => {
                            Ok(Value::Null)
                        }
                        MissingKey::Error => Err(self.error(
                            node.pos(),
                            node,
                            format!("map has no entry for key {:?}", name),
                        )),
                    },
                }
            }
            Value::Null => Err(self.error(
                node.pos(),
                node,
                format!("nil data; no entry for key {:?}", name),
            )),
            other => Err(self.error(
                node.pos(),
                node,
                format!("can't evaluate field {} in type {}", name, other.kind()),
            )),
        }
    }

    fn eval_function(
        &mut self,
        dot: &Value,
        cmd: &CommandNode,
        name: &str,
        args: &[Arg],
        last: Option<Value>,
    ) -> Result<Value> {
        if name == SQL_LITERAL {
            let mut argv = self.eval_args(dot, args)?;
            argv.extend(last);
            if argv.len() != 1 {
                return Err(self.error(
                    cmd.pos,
                    cmd,
                    format!("wrong number of args for {}: want 1 got {}", name, argv.len()),
                ));
            }
            return self.encode(cmd, &argv[0]);
        }

        if (name == "and" || name == "or") && !self.env.funcs.contains(name) {
            return self.eval_short_circuit(dot, cmd, name == "or", args, last);
        }

        let Some(func) = self.env.funcs.get(name).or_else(|| builtins().get(name)) else {
            return Err(self.error(cmd.pos, cmd, format!("{:?} is not a defined function", name)));
        };
        let func = Arc::clone(func);

        let mut argv = self.eval_args(dot, args)?;
        argv.extend(last);
        func(&argv).map_err(|e| self.error(cmd.pos, cmd, format!("error calling {}: {}", name, e)))
    }

    /// `and` stops at the first false argument, `or` at the first true one.
    fn eval_short_circuit(
        &mut self,
        dot: &Value,
        cmd: &CommandNode,
        stop_on: bool,
        args: &[Arg],
        last: Option<Value>,
    ) -> Result<Value> {
        let name = if stop_on { "or" } else { "and" };
        if args.is_empty() && last.is_none() {
            return Err(self.error(
                cmd.pos,
                cmd,
                format!("wrong number of args for {}: want at least 1 got 0", name),
            ));
        }
        let mut value = Value::Null;
        for arg in args {
            value = self.eval_arg(dot, arg)?;
            if value.is_true() == stop_on {
                return Ok(value);
            }
        }
        Ok(last.unwrap_or(value))
    }

    fn eval_args(&mut self, dot: &Value, args: &[Arg]) -> Result<Vec<Value>> {
        args.iter().map(|arg| self.eval_arg(dot, arg)).collect()
    }

    fn eval_arg(&mut self, dot: &Value, arg: &Arg) -> Result<Value> {
        match arg {
            Arg::Dot(_) => Ok(dot.clone()),
            Arg::Nil(_) => Ok(Value::Null),
            Arg::Bool(_, b) => Ok(Value::Bool(*b)),
            Arg::Number(n) => match (n.int, n.float) {
                (Some(i), _) => Ok(Value::Int(i)),
                (None, Some(f)) => Ok(Value::Float(f)),
                (None, None) => Err(self.error(n.pos, arg, format!("illegal number syntax: {:?}", n.text))),
            },
            Arg::String(s) => Ok(Value::String(s.text.clone())),
            Arg::Field(field) => self.eval_field_chain(dot.clone(), arg, &field.idents, &[], None),
            Arg::Variable(var) => {
                let value = self.var(var)?;
                if var.fields.is_empty() {
                    Ok(value)
                } else {
                    self.eval_field_chain(value, arg, &var.fields, &[], None)
                }
            }
            Arg::Chain(chain) => {
                let receiver = self.eval_arg(dot, &chain.node)?;
                self.eval_field_chain(receiver, arg, &chain.fields, &[], None)
            }
            Arg::Pipe(pipe) => self.eval_pipeline(dot, pipe),
            Arg::Identifier(ident) => {
                let cmd = CommandNode {
                    pos: ident.pos,
                    args: vec![arg.clone()],
                };
                self.eval_function(dot, &cmd, &ident.name, &[], None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escape::escape_tree;
    use crate::literal::default_encoder;
    use crate::parse::{parse, ParseOptions};
    use pretty_assertions::assert_eq;

    fn run_with(src: &str, data: Value, missing_key: MissingKey, escape: bool) -> Result<String> {
        let trees = parse("t", src, &ParseOptions::default())?;
        let trees: BTreeMap<String, Arc<Tree>> = trees
            .into_iter()
            .map(|(name, mut tree)| {
                if escape {
                    escape_tree(&mut tree);
                }
                (name, Arc::new(tree))
            })
            .collect();
        let funcs = FuncMap::new();
        let encoder = default_encoder();
        let env = Env {
            trees: &trees,
            funcs: &funcs,
            encoder: &encoder,
            missing_key,
        };
        let mut out = Vec::new();
        execute(&env, &mut out, &trees["t"], &data)?;
        Ok(String::from_utf8(out).unwrap())
    }

    fn run(src: &str, data: Value) -> String {
        run_with(src, data, MissingKey::Default, true).unwrap()
    }

    fn raw(src: &str, data: Value) -> String {
        run_with(src, data, MissingKey::Default, false).unwrap()
    }

    fn data() -> Value {
        Value::from(serde_json::json!({
            "id": 7,
            "name": "O'Brien",
            "tags": ["a", "b"],
            "user": {"email": "x@y.z"},
            "empty": [],
        }))
    }

    #[test]
    fn test_escaped_values() {
        assert_eq!(run("{{.}}", "A".into()), "'A'");
        assert_eq!(run("{{$v := .}}{{$v}}", "A".into()), "'A'");
        assert_eq!(
            run("{{$v := printf \"~%s~\" .}}{{printf \"<%s>\" $v}}", "A".into()),
            "'<~A~>'"
        );
        assert_eq!(
            run("WHERE id = {{.id}} AND name = {{.name}}", data()),
            "WHERE id = 7 AND name = 'O''Brien'"
        );
        assert_eq!(run("{{.user.email}}", data()), "'x@y.z'");
    }

    #[test]
    fn test_range() {
        assert_eq!(
            run("{{range $i, $t := .tags}}{{if $i}}, {{end}}{{$t}}{{end}}", data()),
            "'a', 'b'"
        );
        assert_eq!(run("{{range .empty}}x{{else}}none{{end}}", data()), "none");
        assert_eq!(raw("{{range 3}}{{.}}{{end}}", Value::Null), "012");
        assert_eq!(
            raw("{{range .}}{{if eq . 2}}{{break}}{{end}}{{.}}{{end}}", Value::List(vec![1.into(), 2.into(), 3.into()])),
            "1"
        );
        assert_eq!(
            raw("{{range .}}{{if eq . 2}}{{continue}}{{end}}{{.}}{{end}}", Value::List(vec![1.into(), 2.into(), 3.into()])),
            "13"
        );
        assert_eq!(
            raw("{{range $k, $v := .}}{{$k}}={{$v}};{{end}}", serde_json::json!({"b": 2, "a": 1}).into()),
            "a=1;b=2;"
        );
    }

    #[test]
    fn test_range_over_large_count_breaks_early() {
        let data = Value::from(serde_json::json!({"n": 1i64 << 40}));
        assert_eq!(run("{{range .n}}x{{break}}{{end}}", data.clone()), "x");
        assert_eq!(
            raw("{{range $i := .n}}{{if eq $i 3}}{{break}}{{end}}{{$i}}{{end}}", data),
            "012"
        );
        assert_eq!(raw("{{range -4}}x{{else}}none{{end}}", Value::Null), "none");
    }

    #[test]
    fn test_bare_hook_without_value() {
        for src in ["{{sqlliteral}}", "{{(sqlliteral)}}"] {
            let err = run_with(src, Value::Null, MissingKey::Default, true).unwrap_err();
            assert!(
                err.to_string()
                    .ends_with("wrong number of args for sqlliteral: want 1 got 0"),
                "{}",
                err
            );
        }
        assert_eq!(run("{{. | sqlliteral}}", "A".into()), "'A'");
    }

    #[test]
    fn test_with_and_if() {
        assert_eq!(run("{{with .user}}{{.email}}{{end}}", data()), "'x@y.z'");
        assert_eq!(run("{{with .missing}}x{{else}}{{.id}}{{end}}", data()), "7");
        assert_eq!(run("{{if and .id .name}}yes{{end}}", data()), "yes");
        assert_eq!(run("{{if or .missing .empty}}yes{{else}}no{{end}}", data()), "no");
    }

    #[test]
    fn test_and_short_circuits() {
        assert_eq!(
            raw("{{if and .tags (index .tags 0)}}ok{{end}}", data()),
            "ok"
        );
        assert_eq!(raw("{{and .empty (index .empty 0)}}", data()), "[]");
    }

    #[test]
    fn test_template_call() {
        let src = "{{define \"cond\"}}id = {{.}}{{end}}WHERE {{template \"cond\" .id}}";
        assert_eq!(run(src, data()), "WHERE id = 7");
    }

    #[test]
    fn test_recursion_limit() {
        let err = run_with("{{define \"r\"}}{{template \"r\"}}{{end}}{{template \"r\"}}", Value::Null, MissingKey::Default, true)
            .unwrap_err();
        assert!(err.to_string().contains("exceeded maximum template depth"));
    }

    #[test]
    fn test_missing_key() {
        assert_eq!(run("{{.missing}}", data()), "NULL");
        let err = run_with("{{.missing}}", data(), MissingKey::Error, true).unwrap_err();
        assert_eq!(
            err.to_string(),
            "template: t:1: executing \"t\" at <.missing>: map has no entry for key \"missing\""
        );
        let err = run_with("{{.a}}", Value::Null, MissingKey::Default, true).unwrap_err();
        assert_eq!(
            err.to_string(),
            "template: t:1: executing \"t\" at <.a>: nil data; no entry for key \"a\""
        );
    }

    #[test]
    fn test_encode_error() {
        let err = run_with("\n{{.tags}}", data(), MissingKey::Default, true).unwrap_err();
        assert!(matches!(err, Error::Encode { line: 2, .. }));
        assert_eq!(
            err.to_string(),
            "template: t:2: executing \"t\" at <.tags>: unsupported type list"
        );
    }

    #[test]
    fn test_function_errors() {
        let err = run_with("{{index .tags 9}}", data(), MissingKey::Default, true).unwrap_err();
        assert_eq!(
            err.to_string(),
            "template: t:1: executing \"t\" at <index .tags 9>: error calling index: index out of range: 9"
        );
        let err = run_with("{{. | 3}}", data(), MissingKey::Default, true).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn test_missing_key_parse() {
        assert_eq!("error".parse::<MissingKey>(), Ok(MissingKey::Error));
        assert_eq!("bogus".parse::<MissingKey>(), Err("bogus".to_string()));
    }
}
