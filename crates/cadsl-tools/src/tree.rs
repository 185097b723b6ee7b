//! Parse-tree model handed over by the grammar front end.
//!
//! A tree node has a rule name (`data`) and children; leaves are tokens with
//! a terminal kind and their source text. The JSON form is
//! `{"data": "...", "children": [...]}` for trees and
//! `{"type": "...", "value": "..."}` for tokens.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub data: String,
    #[serde(default)]
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Tree(Tree),
    Token(Token),
}

impl Tree {
    pub fn new(data: impl Into<String>, children: Vec<Node>) -> Self {
        Self {
            data: data.into(),
            children,
        }
    }

    pub fn subtrees(&self) -> impl Iterator<Item = &Tree> {
        self.children.iter().filter_map(Node::as_tree)
    }

    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.children.iter().filter_map(Node::as_token)
    }

    /// First direct child tree named `data`.
    pub fn find(&self, data: &str) -> Option<&Tree> {
        self.subtrees().find(|t| t.data == data)
    }

    pub fn find_all<'a>(&'a self, data: &'a str) -> impl Iterator<Item = &'a Tree> + 'a {
        self.subtrees().filter(move |t| t.data == data)
    }

    /// First tree named `data` anywhere below this one, depth first.
    pub fn find_deep(&self, data: &str) -> Option<&Tree> {
        for child in self.subtrees() {
            if child.data == data {
                return Some(child);
            }
            if let Some(found) = child.find_deep(data) {
                return Some(found);
            }
        }
        None
    }

    pub fn token(&self, kind: &str) -> Option<&Token> {
        self.tokens().find(|t| t.kind == kind)
    }

    pub fn first_token(&self) -> Option<&Token> {
        self.tokens().next()
    }

    /// The token this tree reduces to when every level has exactly one child.
    pub fn single_token(&self) -> Option<&Token> {
        match self.children.as_slice() {
            [Node::Token(t)] => Some(t),
            [Node::Tree(t)] => t.single_token(),
            _ => None,
        }
    }
}

impl Node {
    pub fn tree(data: impl Into<String>, children: Vec<Node>) -> Self {
        Node::Tree(Tree::new(data, children))
    }

    pub fn token(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Node::Token(Token {
            kind: kind.into(),
            value: value.into(),
        })
    }

    pub fn as_tree(&self) -> Option<&Tree> {
        match self {
            Node::Tree(t) => Some(t),
            Node::Token(_) => None,
        }
    }

    pub fn as_token(&self) -> Option<&Token> {
        match self {
            Node::Token(t) => Some(t),
            Node::Tree(_) => None,
        }
    }

    /// Rule name for trees, terminal kind for tokens.
    pub fn label(&self) -> &str {
        match self {
            Node::Tree(t) => &t.data,
            Node::Token(t) => &t.kind,
        }
    }
}
