//! Parse tree for templates.
//!
//! Statement nodes ([`Node`]) form the body of a template; operand nodes
//! ([`Arg`]) make up the commands of a pipeline. Every node renders back
//! to template source through `Display`.

use std::fmt;

/// Source position of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pos {
    /// Byte offset into the template source.
    pub offset: usize,
    /// 1-based line number.
    pub line: usize,
}

impl Pos {
    pub fn new(offset: usize, line: usize) -> Self {
        Self { offset, line }
    }
}

/// A parsed template body.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    pub name: String,
    pub root: ListNode,
}

impl Tree {
    pub fn new(name: impl Into<String>, root: ListNode) -> Self {
        Self {
            name: name.into(),
            root,
        }
    }

    /// True when the body holds nothing but whitespace and comments.
    pub fn is_empty(&self) -> bool {
        self.root.nodes.iter().all(|node| match node {
            Node::Text(text) => text.text.trim().is_empty(),
            Node::Comment(_) => true,
            _ => false,
        })
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}

/// A sequence of statements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListNode {
    pub pos: Pos,
    pub nodes: Vec<Node>,
}

impl ListNode {
    pub fn new(pos: Pos) -> Self {
        Self {
            pos,
            nodes: Vec::new(),
        }
    }
}

impl fmt::Display for ListNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.nodes {
            write!(f, "{}", node)?;
        }
        Ok(())
    }
}

/// Statement nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(TextNode),
    Comment(CommentNode),
    Action(ActionNode),
    If(BranchNode),
    Range(BranchNode),
    With(BranchNode),
    Template(TemplateNode),
    Break(Pos),
    Continue(Pos),
}

impl Node {
    pub fn pos(&self) -> Pos {
        match self {
            Node::Text(n) => n.pos,
            Node::Comment(n) => n.pos,
            Node::Action(n) => n.pos,
            Node::If(n) | Node::Range(n) | Node::With(n) => n.pos,
            Node::Template(n) => n.pos,
            Node::Break(pos) | Node::Continue(pos) => *pos,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Text(n) => f.write_str(&n.text),
            Node::Comment(n) => write!(f, "{{{{/*{}*/}}}}", n.text),
            Node::Action(n) => write!(f, "{{{{{}}}}}", n.pipe),
            Node::If(n) => n.fmt_branch(f, "if"),
            Node::Range(n) => n.fmt_branch(f, "range"),
            Node::With(n) => n.fmt_branch(f, "with"),
            Node::Template(n) => match &n.pipe {
                Some(pipe) => write!(f, "{{{{template {:?} {}}}}}", n.name, pipe),
                None => write!(f, "{{{{template {:?}}}}}", n.name),
            },
            Node::Break(_) => f.write_str("{{break}}"),
            Node::Continue(_) => f.write_str("{{continue}}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextNode {
    pub pos: Pos,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommentNode {
    pub pos: Pos,
    pub text: String,
}

/// `{{pipeline}}`: the pipeline's value is written to the output.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionNode {
    pub pos: Pos,
    pub pipe: PipeNode,
}

/// `{{if}}`, `{{range}}` and `{{with}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchNode {
    pub pos: Pos,
    pub pipe: PipeNode,
    pub list: ListNode,
    pub else_list: Option<ListNode>,
}

impl BranchNode {
    fn fmt_branch(&self, f: &mut fmt::Formatter<'_>, keyword: &str) -> fmt::Result {
        write!(f, "{{{{{} {}}}}}{}", keyword, self.pipe, self.list)?;
        if let Some(else_list) = &self.else_list {
            write!(f, "{{{{else}}}}{}", else_list)?;
        }
        f.write_str("{{end}}")
    }
}

/// `{{template "name" pipeline}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateNode {
    pub pos: Pos,
    pub name: String,
    pub pipe: Option<PipeNode>,
}

/// A pipeline with optional variable declarations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipeNode {
    pub pos: Pos,
    /// `$x = ...` rather than `$x := ...`.
    pub is_assign: bool,
    pub decl: Vec<VariableNode>,
    pub cmds: Vec<CommandNode>,
}

impl fmt::Display for PipeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.decl.is_empty() {
            for (i, v) in self.decl.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", v)?;
            }
            f.write_str(if self.is_assign { " = " } else { " := " })?;
        }
        for (i, cmd) in self.cmds.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{}", cmd)?;
        }
        Ok(())
    }
}

/// One stage of a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandNode {
    pub pos: Pos,
    pub args: Vec<Arg>,
}

impl CommandNode {
    /// True when this command is exactly the bare identifier `name`.
    pub fn is_bare_identifier(&self, name: &str) -> bool {
        matches!(self.args.as_slice(), [Arg::Identifier(ident)] if ident.name == name)
    }
}

impl fmt::Display for CommandNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", arg)?;
        }
        Ok(())
    }
}

/// Operand nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// A function name.
    Identifier(IdentifierNode),
    Dot(Pos),
    Nil(Pos),
    Bool(Pos, bool),
    Number(NumberNode),
    String(StringNode),
    /// `.a.b`
    Field(FieldNode),
    /// `$x` or `$x.a.b`
    Variable(VariableNode),
    /// `(pipeline).a.b`
    Chain(ChainNode),
    /// A parenthesized pipeline.
    Pipe(Box<PipeNode>),
}

impl Arg {
    pub fn pos(&self) -> Pos {
        match self {
            Arg::Identifier(n) => n.pos,
            Arg::Dot(pos) | Arg::Nil(pos) | Arg::Bool(pos, _) => *pos,
            Arg::Number(n) => n.pos,
            Arg::String(n) => n.pos,
            Arg::Field(n) => n.pos,
            Arg::Variable(n) => n.pos,
            Arg::Chain(n) => n.pos,
            Arg::Pipe(n) => n.pos,
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Identifier(n) => f.write_str(&n.name),
            Arg::Dot(_) => f.write_str("."),
            Arg::Nil(_) => f.write_str("nil"),
            Arg::Bool(_, b) => write!(f, "{}", b),
            Arg::Number(n) => f.write_str(&n.text),
            Arg::String(n) => f.write_str(&n.quoted),
            Arg::Field(n) => {
                for ident in &n.idents {
                    write!(f, ".{}", ident)?;
                }
                Ok(())
            }
            Arg::Variable(n) => write!(f, "{}", n),
            Arg::Chain(n) => {
                write!(f, "{}", n.node)?;
                for field in &n.fields {
                    write!(f, ".{}", field)?;
                }
                Ok(())
            }
            Arg::Pipe(pipe) => write!(f, "({})", pipe),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentifierNode {
    pub pos: Pos,
    pub name: String,
}

impl IdentifierNode {
    pub fn new(name: impl Into<String>, pos: Pos) -> Self {
        Self {
            pos,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumberNode {
    pub pos: Pos,
    pub text: String,
    /// Set when the literal is written as an integer.
    pub int: Option<i64>,
    pub float: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StringNode {
    pub pos: Pos,
    /// Original text with quotes.
    pub quoted: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldNode {
    pub pos: Pos,
    pub idents: Vec<String>,
}

/// `$name` followed by zero or more field names.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableNode {
    pub pos: Pos,
    pub name: String,
    pub fields: Vec<String>,
}

impl fmt::Display for VariableNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for field in &self.fields {
            write!(f, ".{}", field)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainNode {
    pub pos: Pos,
    pub node: Box<Arg>,
    pub fields: Vec<String>,
}
