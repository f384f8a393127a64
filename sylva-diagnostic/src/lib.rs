
use std::fmt::Write;
use std::path::PathBuf;

#[derive(PartialEq, Eq, Debug, Hash, Clone)]
pub enum Source {
    File { path: PathBuf },
    Interactive { label: String },
}

impl Source {
    pub fn to_str(&self) -> &str {
        match self {
            Source::File { path } => path.to_str().unwrap_or("<non-utf8 path>"),
            Source::Interactive { label } => label,
        }
    }
}

#[derive(PartialEq, Eq, Debug, Hash, Clone)]
pub struct Location {
    pub source: Source,
    /// Byte offset into the source, when known.
    pub offset: Option<usize>,
}

#[derive(PartialEq, Eq, Debug, Hash, Clone)]
pub struct Message {
    pub content: String,
    pub addendum: Option<String>,
}

/// Accumulates error messages, keeping located ones sorted by offset.
#[derive(Default)]
pub struct Diagnostic {
    items: Vec<Message>,
    located_items: Vec<(Location, Message)>,
}

impl Diagnostic {
    pub fn new() -> Self {
        Diagnostic {
            items: Vec::new(),
            located_items: Vec::new(),
        }
    }

    pub fn item(&mut self, location: Option<Location>, message: Message) {
        match location {
            None => self.items.push(message),
            Some(location) => {
                match self
                    .located_items
                    .binary_search_by_key(&location.offset, |i| i.0.offset)
                {
                    Err(ix) => self.located_items.insert(ix, (location, message)),
                    Ok(ix) => self.located_items.insert(ix + 1, (location, message)),
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.located_items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len() + self.located_items.len()
    }

    /// Render every collected message, one per line, located messages
    /// first in offset order.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (location, message) in &self.located_items {
            out.push_str(location.source.to_str());
            out.push(':');
            if let Some(offset) = location.offset {
                write!(out, "{}:", offset).unwrap();
            }
            out.push_str(" error: ");
            out.push_str(&message.content);
            if let Some(addendum) = &message.addendum {
                out.push('\n');
                out.push_str(addendum);
            }
            out.push('\n');
        }
        for message in &self.items {
            out.push_str("error: ");
            out.push_str(&message.content);
            out.push('\n');
        }
        out
    }
}
