//! Template parser.
//!
//! Builds [`Tree`]s from lexed items. The main template and every
//! `{{define}}`/`{{block}}` body become separate trees.

use std::collections::BTreeMap;

use super::lex::{lex, Item, Keyword, Token, TokenKind};
use super::node::*;
use super::ParseOptions;
use crate::error::{Error, Result};

/// Parse `text` as the body of template `name`.
///
/// Returns the main tree along with every tree defined inside it, keyed by
/// name.
pub fn parse(name: &str, text: &str, opts: &ParseOptions<'_>) -> Result<BTreeMap<String, Tree>> {
    let lines = line_starts(text);
    let items = match lex(text, opts.left_delim, opts.right_delim) {
        Ok(items) => items,
        Err(e) => return Err(Error::parse(name, line_of(&lines, e.pos), e.message)),
    };

    let mut parser = Parser {
        name: name.to_string(),
        items: items.into_iter(),
        lines,
        opts,
        vars: vec!["$".to_string()],
        range_depth: 0,
        trees: BTreeMap::new(),
    };
    let root = parser.parse_top()?;
    parser.add_tree(Tree::new(name, root))?;
    Ok(parser.trees)
}

fn line_starts(text: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(text.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

fn line_of(lines: &[usize], offset: usize) -> usize {
    lines.partition_point(|&start| start <= offset).max(1)
}

/// Result of parsing one item.
enum Parsed {
    Node(Node),
    Else(Pos, Vec<Token>),
    End(Pos),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Control {
    If,
    Range,
    With,
}

impl Control {
    fn as_str(self) -> &'static str {
        match self {
            Control::If => "if",
            Control::Range => "range",
            Control::With => "with",
        }
    }
}

/// Cursor over the tokens of a single action.
struct Cursor<'t> {
    tokens: &'t [Token],
    i: usize,
    /// Offset of the action, used when the tokens run out.
    pos: usize,
}

impl<'t> Cursor<'t> {
    fn new(tokens: &'t [Token], pos: usize) -> Self {
        Self { tokens, i: 0, pos }
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.i)
    }

    fn peek_kind(&self) -> Option<&'t TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn next(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.i);
        if token.is_some() {
            self.i += 1;
        }
        token
    }

    fn offset(&self) -> usize {
        self.peek().map_or(self.pos, |t| t.pos)
    }
}

struct Parser<'a> {
    name: String,
    items: std::vec::IntoIter<Item>,
    lines: Vec<usize>,
    opts: &'a ParseOptions<'a>,
    /// Variables in scope, innermost last.
    vars: Vec<String>,
    range_depth: usize,
    trees: BTreeMap<String, Tree>,
}

impl Parser<'_> {
    fn pos(&self, offset: usize) -> Pos {
        Pos::new(offset, line_of(&self.lines, offset))
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> Error {
        Error::parse(&self.name, line_of(&self.lines, offset), message)
    }

    fn add_tree(&mut self, tree: Tree) -> Result<()> {
        if let Some(existing) = self.trees.get(&tree.name) {
            if tree.is_empty() {
                return Ok(());
            }
            if !existing.is_empty() {
                return Err(self.error(
                    tree.root.pos.offset,
                    format!("template: multiple definition of template {:?}", tree.name),
                ));
            }
        }
        self.trees.insert(tree.name.clone(), tree);
        Ok(())
    }

    fn parse_top(&mut self) -> Result<ListNode> {
        let mut list = ListNode::new(self.pos(0));
        while let Some(item) = self.items.next() {
            if let Item::Action { pos, tokens } = &item {
                if let Some(TokenKind::Keyword(Keyword::Define)) = tokens.first().map(|t| &t.kind) {
                    self.parse_definition(*pos, &tokens[1..])?;
                    continue;
                }
            }
            match self.text_or_action(item)? {
                Parsed::Node(node) => list.nodes.push(node),
                Parsed::Else(pos, _) => return Err(self.error(pos.offset, "unexpected {{else}}")),
                Parsed::End(pos) => return Err(self.error(pos.offset, "unexpected {{end}}")),
            }
        }
        Ok(list)
    }

    /// `{{define "name"}} ... {{end}}`
    fn parse_definition(&mut self, pos: usize, tokens: &[Token]) -> Result<()> {
        let name = match tokens {
            [Token {
                kind: TokenKind::Str { text, .. },
                ..
            }] => text.clone(),
            [Token {
                kind: TokenKind::Str { .. },
                ..
            }, extra, ..] => {
                return Err(self.error(
                    extra.pos,
                    format!("unexpected {} in define clause", extra.kind.describe()),
                ));
            }
            _ => {
                return Err(self.error(pos, "name of defined template must be a string"));
            }
        };

        let body = self.isolated_body(pos, "define clause")?;
        self.add_tree(Tree::new(name, body))
    }

    /// Parse a define/block body with a fresh variable scope, up to `{{end}}`.
    fn isolated_body(&mut self, pos: usize, context: &str) -> Result<ListNode> {
        let saved_vars = std::mem::replace(&mut self.vars, vec!["$".to_string()]);
        let saved_depth = std::mem::replace(&mut self.range_depth, 0);
        let result = self.item_list(pos);
        self.vars = saved_vars;
        self.range_depth = saved_depth;

        match result? {
            (list, Parsed::End(_)) => Ok(list),
            (_, Parsed::Else(p, _)) => {
                Err(self.error(p.offset, format!("unexpected {{{{else}}}} in {}", context)))
            }
            (_, Parsed::Node(_)) => unreachable!("item_list only stops at a terminator"),
        }
    }

    /// Parse items until `{{else}}` or `{{end}}`.
    fn item_list(&mut self, start: usize) -> Result<(ListNode, Parsed)> {
        let mut list = ListNode::new(self.pos(start));
        loop {
            let Some(item) = self.items.next() else {
                return Err(self.error(start, "unexpected EOF"));
            };
            match self.text_or_action(item)? {
                Parsed::Node(node) => list.nodes.push(node),
                terminator => return Ok((list, terminator)),
            }
        }
    }

    fn text_or_action(&mut self, item: Item) -> Result<Parsed> {
        match item {
            Item::Text { pos, text } => Ok(Parsed::Node(Node::Text(TextNode {
                pos: self.pos(pos),
                text,
            }))),
            Item::Comment { pos, text } => Ok(Parsed::Node(Node::Comment(CommentNode {
                pos: self.pos(pos),
                text,
            }))),
            Item::Action { pos, tokens } => self.action(pos, tokens),
        }
    }

    fn action(&mut self, offset: usize, tokens: Vec<Token>) -> Result<Parsed> {
        let pos = self.pos(offset);
        let Some(first) = tokens.first() else {
            return Err(self.error(offset, "missing value for command"));
        };

        let keyword = match first.kind {
            TokenKind::Keyword(k) => k,
            _ => {
                let mut cur = Cursor::new(&tokens, offset);
                let pipe = self.pipeline_to_end(&mut cur, "command")?;
                return Ok(Parsed::Node(Node::Action(ActionNode { pos, pipe })));
            }
        };

        let rest = &tokens[1..];
        match keyword {
            Keyword::End => {
                if let Some(extra) = rest.first() {
                    return Err(self.error(
                        extra.pos,
                        format!("unexpected {} in end", extra.kind.describe()),
                    ));
                }
                Ok(Parsed::End(pos))
            }
            Keyword::Else => Ok(Parsed::Else(pos, rest.to_vec())),
            Keyword::If => self.control(Control::If, pos, rest).map(Parsed::Node),
            Keyword::Range => self.control(Control::Range, pos, rest).map(Parsed::Node),
            Keyword::With => self.control(Control::With, pos, rest).map(Parsed::Node),
            Keyword::Template => self.template_control(pos, rest).map(Parsed::Node),
            Keyword::Block => self.block_control(pos, rest).map(Parsed::Node),
            Keyword::Break | Keyword::Continue => {
                let word = keyword.as_str();
                if let Some(extra) = rest.first() {
                    return Err(self.error(
                        extra.pos,
                        format!("unexpected {} in {{{{{}}}}}", extra.kind.describe(), word),
                    ));
                }
                if self.range_depth == 0 {
                    return Err(self.error(offset, format!("{{{{{}}}}} outside {{{{range}}}}", word)));
                }
                Ok(Parsed::Node(if keyword == Keyword::Break {
                    Node::Break(pos)
                } else {
                    Node::Continue(pos)
                }))
            }
            Keyword::Define => Err(self.error(offset, "unexpected <define> in command")),
        }
    }

    /// `{{if pipeline}}`, `{{range pipeline}}` and `{{with pipeline}}`,
    /// including `{{else if}}` and `{{else with}}` chains.
    fn control(&mut self, kind: Control, pos: Pos, tokens: &[Token]) -> Result<Node> {
        let saved_vars = self.vars.len();
        let result = self.control_body(kind, pos, tokens);
        self.vars.truncate(saved_vars);
        let branch = result?;

        Ok(match kind {
            Control::If => Node::If(branch),
            Control::Range => Node::Range(branch),
            Control::With => Node::With(branch),
        })
    }

    fn control_body(&mut self, kind: Control, pos: Pos, tokens: &[Token]) -> Result<BranchNode> {
        let mut cur = Cursor::new(tokens, pos.offset);
        let pipe = self.pipeline_to_end(&mut cur, kind.as_str())?;

        if kind == Control::Range {
            self.range_depth += 1;
        }
        let result = self.item_list(pos.offset);
        if kind == Control::Range {
            self.range_depth -= 1;
        }
        let (list, terminator) = result?;

        let else_list = match terminator {
            Parsed::End(_) => None,
            Parsed::Else(else_pos, rest) => Some(self.else_branch(kind, else_pos, &rest)?),
            Parsed::Node(_) => unreachable!("item_list only stops at a terminator"),
        };

        Ok(BranchNode {
            pos,
            pipe,
            list,
            else_list,
        })
    }

    fn else_branch(&mut self, kind: Control, pos: Pos, rest: &[Token]) -> Result<ListNode> {
        match rest.first().map(|t| &t.kind) {
            None => {
                let (list, terminator) = self.item_list(pos.offset)?;
                match terminator {
                    Parsed::End(_) => Ok(list),
                    Parsed::Else(p, _) => {
                        Err(self.error(p.offset, "expected end; found {{else}}"))
                    }
                    Parsed::Node(_) => unreachable!("item_list only stops at a terminator"),
                }
            }
            // The chained control consumes the shared {{end}}.
            Some(TokenKind::Keyword(Keyword::If)) if kind == Control::If => {
                let nested = self.control(Control::If, pos, &rest[1..])?;
                Ok(ListNode {
                    pos,
                    nodes: vec![nested],
                })
            }
            Some(TokenKind::Keyword(Keyword::With)) if kind == Control::With => {
                let nested = self.control(Control::With, pos, &rest[1..])?;
                Ok(ListNode {
                    pos,
                    nodes: vec![nested],
                })
            }
            Some(other) => Err(self.error(
                rest[0].pos,
                format!("unexpected {} in else", other.describe()),
            )),
        }
    }

    /// `{{template "name"}}` or `{{template "name" pipeline}}`.
    fn template_control(&mut self, pos: Pos, tokens: &[Token]) -> Result<Node> {
        let name = self.clause_name(pos, tokens, "template clause")?;
        let pipe = if tokens.len() > 1 {
            let mut cur = Cursor::new(&tokens[1..], pos.offset);
            Some(self.pipeline_to_end(&mut cur, "template clause")?)
        } else {
            None
        };
        Ok(Node::Template(TemplateNode { pos, name, pipe }))
    }

    /// `{{block "name" pipeline}} ... {{end}}` defines `name` and invokes it.
    fn block_control(&mut self, pos: Pos, tokens: &[Token]) -> Result<Node> {
        let name = self.clause_name(pos, tokens, "block clause")?;
        let mut cur = Cursor::new(&tokens[1..], pos.offset);
        let pipe = self.pipeline_to_end(&mut cur, "block clause")?;

        let body = self.isolated_body(pos.offset, "block clause")?;
        self.add_tree(Tree::new(name.clone(), body))?;

        Ok(Node::Template(TemplateNode {
            pos,
            name,
            pipe: Some(pipe),
        }))
    }

    fn clause_name(&self, pos: Pos, tokens: &[Token], context: &str) -> Result<String> {
        match tokens.first().map(|t| &t.kind) {
            Some(TokenKind::Str { text, .. }) => Ok(text.clone()),
            Some(other) => Err(self.error(
                tokens[0].pos,
                format!("unexpected {} in {}", other.describe(), context),
            )),
            None => Err(self.error(pos.offset, format!("missing name in {}", context))),
        }
    }

    /// Parse a pipeline that must use every remaining token.
    fn pipeline_to_end(&mut self, cur: &mut Cursor<'_>, context: &str) -> Result<PipeNode> {
        let pipe = self.pipeline(cur, context)?;
        if let Some(extra) = cur.peek() {
            return Err(self.error(
                extra.pos,
                format!("unexpected {} in {}", extra.kind.describe(), context),
            ));
        }
        Ok(pipe)
    }

    fn pipeline(&mut self, cur: &mut Cursor<'_>, context: &str) -> Result<PipeNode> {
        let pos = self.pos(cur.offset());
        let mut pipe = PipeNode {
            pos,
            ..PipeNode::default()
        };

        self.declarations(cur, context, &mut pipe)?;

        loop {
            match cur.peek_kind() {
                None | Some(TokenKind::RightParen) => break,
                _ => {}
            }
            let cmd = self.command(cur)?;
            pipe.cmds.push(cmd);
            match cur.peek_kind() {
                Some(TokenKind::Pipe) => {
                    let bar = cur.next().map_or(cur.pos, |t| t.pos);
                    if matches!(cur.peek_kind(), None | Some(TokenKind::RightParen)) {
                        return Err(self.error(bar, "missing command after |"));
                    }
                }
                _ => break,
            }
        }

        if pipe.cmds.is_empty() {
            return Err(self.error(pos.offset, format!("missing value for {}", context)));
        }
        for (i, cmd) in pipe.cmds.iter().enumerate().skip(1) {
            if let Some(Arg::Bool(..) | Arg::Dot(_) | Arg::Nil(_) | Arg::Number(_) | Arg::String(_)) =
                cmd.args.first()
            {
                return Err(self.error(
                    cmd.pos.offset,
                    format!("non executable command in pipeline stage {}", i + 1),
                ));
            }
        }
        Ok(pipe)
    }

    /// `$x :=`, `$x =`, and in a range `$i, $x :=`.
    fn declarations(&mut self, cur: &mut Cursor<'_>, context: &str, pipe: &mut PipeNode) -> Result<()> {
        let mut decl = Vec::new();
        let mut declared = false;
        let mut i = cur.i;

        loop {
            let Some(Token {
                kind: TokenKind::Variable { name, fields },
                pos,
                ..
            }) = cur.tokens.get(i)
            else {
                break;
            };
            if !fields.is_empty() {
                break;
            }
            let var = VariableNode {
                pos: self.pos(*pos),
                name: name.clone(),
                fields: Vec::new(),
            };
            match cur.tokens.get(i + 1).map(|t| &t.kind) {
                Some(TokenKind::Declare) | Some(TokenKind::Assign) => {
                    pipe.is_assign = matches!(cur.tokens[i + 1].kind, TokenKind::Assign);
                    decl.push(var);
                    cur.i = i + 2;
                    declared = true;
                    break;
                }
                Some(TokenKind::Comma) if context == "range" && decl.is_empty() => {
                    decl.push(var);
                    i += 2;
                }
                Some(TokenKind::Comma) => {
                    return Err(self.error(*pos, format!("too many declarations in {}", context)));
                }
                _ if decl.is_empty() => break,
                _ => return Err(self.error(*pos, format!("missing := in {}", context))),
            }
        }

        if !declared {
            if !decl.is_empty() {
                return Err(self.error(cur.offset(), format!("missing := in {}", context)));
            }
            return Ok(());
        }
        for var in &decl {
            if pipe.is_assign {
                self.use_var(var.pos.offset, &var.name)?;
            } else {
                self.vars.push(var.name.clone());
            }
        }
        pipe.decl = decl;
        Ok(())
    }

    fn use_var(&self, offset: usize, name: &str) -> Result<()> {
        if self.vars.iter().any(|v| v == name) {
            Ok(())
        } else {
            Err(self.error(offset, format!("undefined variable {:?}", name)))
        }
    }

    fn command(&mut self, cur: &mut Cursor<'_>) -> Result<CommandNode> {
        let pos = self.pos(cur.offset());
        let mut args = Vec::new();
        loop {
            match cur.peek_kind() {
                None | Some(TokenKind::Pipe) | Some(TokenKind::RightParen) => break,
                _ => args.push(self.operand(cur)?),
            }
        }
        if args.is_empty() {
            return Err(self.error(pos.offset, "empty command"));
        }
        Ok(CommandNode { pos, args })
    }

    fn operand(&mut self, cur: &mut Cursor<'_>) -> Result<Arg> {
        let Some(token) = cur.next() else {
            return Err(self.error(cur.pos, "missing operand"));
        };
        let pos = self.pos(token.pos);

        let node = match &token.kind {
            TokenKind::Ident(name) => {
                if !(self.opts.is_func)(name.as_str()) {
                    return Err(self.error(token.pos, format!("function {:?} not defined", name)));
                }
                Arg::Identifier(IdentifierNode::new(name.clone(), pos))
            }
            TokenKind::Dot => Arg::Dot(pos),
            TokenKind::Nil => Arg::Nil(pos),
            TokenKind::Bool(b) => Arg::Bool(pos, *b),
            TokenKind::Number(text) => Arg::Number(self.number(pos, text)?),
            TokenKind::Str { quoted, text } => Arg::String(StringNode {
                pos,
                quoted: quoted.clone(),
                text: text.clone(),
            }),
            TokenKind::Field(idents) => Arg::Field(FieldNode {
                pos,
                idents: idents.clone(),
            }),
            TokenKind::Variable { name, fields } => {
                self.use_var(token.pos, name)?;
                Arg::Variable(VariableNode {
                    pos,
                    name: name.clone(),
                    fields: fields.clone(),
                })
            }
            TokenKind::LeftParen => {
                let pipe = self.pipeline(cur, "parenthesized pipeline")?;
                match cur.next() {
                    Some(Token {
                        kind: TokenKind::RightParen,
                        ..
                    }) => Arg::Pipe(Box::new(pipe)),
                    _ => return Err(self.error(token.pos, "unclosed left paren")),
                }
            }
            other => {
                return Err(self.error(
                    token.pos,
                    format!("unexpected {} in operand", other.describe()),
                ));
            }
        };

        // A field directly after a term, as in `(pipeline).Field`.
        let Some(Token {
            kind: TokenKind::Field(fields),
            spaced: false,
            pos: field_pos,
        }) = cur.peek()
        else {
            return Ok(node);
        };
        cur.next();
        match node {
            Arg::Identifier(_) | Arg::Pipe(_) | Arg::Chain(_) => Ok(Arg::Chain(ChainNode {
                pos,
                node: Box::new(node),
                fields: fields.clone(),
            })),
            other => Err(self.error(
                *field_pos,
                format!("unexpected . after term {:?}", other.to_string()),
            )),
        }
    }

    fn number(&self, pos: Pos, text: &str) -> Result<NumberNode> {
        let (negative, digits) = match text.as_bytes().first() {
            Some(b'-') => (true, &text[1..]),
            Some(b'+') => (false, &text[1..]),
            _ => (false, text),
        };

        let hex = digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"));
        let (int, float) = if let Some(hex) = hex {
            let n = i64::from_str_radix(hex, 16)
                .ok()
                .map(|n| if negative { -n } else { n });
            (n, n.map(|n| n as f64))
        } else if text.contains(['.', 'e', 'E']) {
            (None, text.parse::<f64>().ok())
        } else {
            let n = text.parse::<i64>().ok();
            (n, text.parse::<f64>().ok())
        };

        if int.is_none() && float.is_none() {
            return Err(self.error(pos.offset, format!("illegal number syntax: {:?}", text)));
        }
        Ok(NumberNode {
            pos,
            text: text.to_string(),
            int,
            float,
        })
    }
}
