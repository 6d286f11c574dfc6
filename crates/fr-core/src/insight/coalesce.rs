use std::collections::HashMap;

use super::types::{Command, CommandRevision, Insight};

/// Records that can be folded together before a batched write.
pub trait Coalesce {
    fn key(&self) -> &str;
    /// Fold a newer record with the same key into `self`.
    fn absorb(&mut self, newer: Self);
}

impl Coalesce for Insight {
    fn key(&self) -> &str {
        &self.id
    }

    fn absorb(&mut self, newer: Self) {
        self.merge(newer);
    }
}

impl Coalesce for Command {
    fn key(&self) -> &str {
        &self.id
    }

    fn absorb(&mut self, newer: Self) {
        match (newer.revision, self.revision) {
            (Some(CommandRevision::Withdrawn), _) => {
                self.revision = Some(CommandRevision::Withdrawn);
            }
            (Some(CommandRevision::Revised), _) => *self = newer,
            // issued again after a withdrawal
            (None, Some(CommandRevision::Withdrawn)) => {
                *self = newer;
                self.revision = Some(CommandRevision::Revised);
            }
            (None, _) => {
                if newer.ended.is_some() {
                    self.ended = newer.ended;
                }
            }
        }
    }
}

/// Fold records sharing a key, keeping first-seen order.
pub fn coalesce<T: Coalesce>(items: Vec<T>) -> Vec<T> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        match index.get(item.key()) {
            Some(&i) => out[i].absorb(item),
            None => {
                index.insert(item.key().to_string(), out.len());
                out.push(item);
            }
        }
    }
    out
}
