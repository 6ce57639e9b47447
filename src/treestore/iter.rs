//! Depth-first iteration over the leaves of the trie.

use smallvec::SmallVec;

use super::cursor::{PageRec, PageRecPos};
use super::layout::ChildRef;
use super::options::DEFAULT_MAX_DEPTH;
use super::TreeStore;
use crate::types::{Result, StoreError};

/// A leaf item together with the path leading to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeLeaf {
    /// Components from the root down to the leaf.
    pub path: Vec<String>,
    /// Location of the leaf item.
    pub pos: PageRecPos,
}

struct Frame {
    pos: PageRecPos,
    name: String,
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum State {
    Start,
    Running,
    Done,
}

/// Depth-first traversal over every leaf of a tree store.
///
/// Only items without children are produced; an item whose child record is
/// empty is skipped along with it. The frame stack is bounded by
/// [`TreeStoreOptions::max_depth`](super::TreeStoreOptions::max_depth);
/// going deeper yields [`StoreError::DepthLimit`] and ends the traversal.
pub struct LeafIterator<'a> {
    tree: &'a mut TreeStore,
    stack: SmallVec<[Frame; DEFAULT_MAX_DEPTH]>,
    max_depth: usize,
    state: State,
}

impl<'a> LeafIterator<'a> {
    pub(crate) fn new(tree: &'a mut TreeStore) -> Self {
        let max_depth = tree.options().max_depth;
        Self {
            tree,
            stack: SmallVec::new(),
            max_depth,
            state: State::Start,
        }
    }

    /// Advances to the next leaf.
    pub fn next_leaf(&mut self) -> Result<Option<TreeLeaf>> {
        let found = match self.state {
            State::Done => return Ok(None),
            State::Start => {
                self.state = State::Running;
                let root = self.tree.root();
                self.move_down_or_right(root, 0)
            }
            State::Running => self.move_right_or_up(),
        };
        match found {
            Ok(true) => self.current().map(Some),
            Ok(false) => {
                self.state = State::Done;
                Ok(None)
            }
            Err(err) => {
                self.state = State::Done;
                Err(err)
            }
        }
    }

    fn current(&self) -> Result<TreeLeaf> {
        let pos = self
            .stack
            .last()
            .map(|frame| frame.pos)
            .ok_or_else(|| StoreError::corruption("leaf iterator stack is empty"))?;
        Ok(TreeLeaf {
            path: self.stack.iter().map(|frame| frame.name.clone()).collect(),
            pos,
        })
    }

    fn move_down(&mut self, at: PageRec, index: u16) -> Result<bool> {
        let page = self.tree.page(at.page)?;
        if index >= page.item_count(at.record)? {
            return Ok(false);
        }
        let item = page.item(at.record, index)?;
        let (name, child) = (item.name.clone(), item.child);
        if self.stack.len() >= self.max_depth {
            return Err(StoreError::DepthLimit(self.max_depth));
        }
        self.stack.push(Frame {
            pos: PageRecPos::new(at.page, at.record, index),
            name,
        });
        let below = match child {
            ChildRef::Leaf => return Ok(true),
            ChildRef::Local(record) => PageRec::new(at.page, record),
            ChildRef::Page(page) => PageRec::new(page, 0),
        };
        if self.move_down_or_right(below, 0)? {
            return Ok(true);
        }
        self.stack.pop();
        Ok(false)
    }

    fn move_down_or_right(&mut self, at: PageRec, index: u16) -> Result<bool> {
        Ok(self.move_down(at, index)? || self.move_right(at, index)?)
    }

    fn move_right(&mut self, at: PageRec, index: u16) -> Result<bool> {
        let count = at.item_count(self.tree)?;
        for next in index + 1..count {
            if self.move_down(at, next)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn move_right_or_up(&mut self) -> Result<bool> {
        while let Some(frame) = self.stack.pop() {
            if self.move_right(frame.pos.page_rec(), frame.pos.index)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Iterator for LeafIterator<'_> {
    type Item = Result<TreeLeaf>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_leaf().transpose()
    }
}
