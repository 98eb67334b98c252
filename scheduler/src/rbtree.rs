//! An intrusive red-black tree.
//!
//! Records embed an [`RbLink`] and implement [`RbNode`]; the tree only
//! rewires the links between them and never allocates. Ordering comes from
//! the comparator given to [`RbTree::new`].
//!
//! Every pointer stored in a link refers to a record that is currently a
//! member of the same tree. [`RbTree::insert`] makes the caller promise that
//! the record stays in place until it is removed, which keeps the pointers
//! valid.

use std::cell::Cell;
use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;

use log::trace;

use crate::error::TreeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Red,
    Black,
}

type LinkPtr = Option<NonNull<RbLink>>;

/// The link fields a record embeds to become a member of an [`RbTree`].
pub struct RbLink {
    parent: Cell<LinkPtr>,
    left: Cell<LinkPtr>,
    right: Cell<LinkPtr>,
    color: Cell<Color>,
    linked: Cell<bool>,
}

impl RbLink {
    pub const fn new() -> Self {
        RbLink {
            parent: Cell::new(None),
            left: Cell::new(None),
            right: Cell::new(None),
            color: Cell::new(Color::Red),
            linked: Cell::new(false),
        }
    }

    /// Whether the record is currently a member of a tree.
    pub fn is_linked(&self) -> bool {
        self.linked.get()
    }

    pub fn color(&self) -> Color {
        self.color.get()
    }

    fn clear(&self) {
        self.parent.set(None);
        self.left.set(None);
        self.right.set(None);
        self.color.set(Color::Red);
        self.linked.set(false);
    }
}

impl Default for RbLink {
    fn default() -> Self {
        RbLink::new()
    }
}

impl fmt::Debug for RbLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RbLink")
            .field("linked", &self.linked.get())
            .field("color", &self.color.get())
            .finish()
    }
}

/// A record that can be linked into an [`RbTree`].
///
/// # Safety
///
/// `from_link` must return the record whose `rb_link` is `link`. Use
/// [`impl_rb_node!`](crate::impl_rb_node) rather than writing it by hand.
pub unsafe trait RbNode {
    fn rb_link(&self) -> &RbLink;

    /// Recovers the record from its embedded link.
    ///
    /// # Safety
    ///
    /// `link` must point at the link embedded in a live `Self`.
    unsafe fn from_link(link: NonNull<RbLink>) -> NonNull<Self>;
}

/// Implements [`RbNode`] for a record embedding an [`RbLink`] field.
#[macro_export]
macro_rules! impl_rb_node {
    ($record:ty, $field:ident) => {
        unsafe impl $crate::rbtree::RbNode for $record {
            fn rb_link(&self) -> &$crate::rbtree::RbLink {
                &self.$field
            }

            unsafe fn from_link(
                link: ::std::ptr::NonNull<$crate::rbtree::RbLink>,
            ) -> ::std::ptr::NonNull<Self> {
                let offset = ::std::mem::offset_of!($record, $field);
                // SAFETY: the caller guarantees that `link` is the `$field` of a
                // live `$record`, so stepping back by its offset stays inside it.
                unsafe {
                    ::std::ptr::NonNull::new_unchecked(
                        link.as_ptr().cast::<u8>().sub(offset).cast::<$record>(),
                    )
                }
            }
        }
    };
}

fn node<'a>(ptr: NonNull<RbLink>) -> &'a RbLink {
    // SAFETY: links only ever point at members of a live tree, see the
    // module documentation.
    unsafe { ptr.as_ref() }
}

fn parent(ptr: NonNull<RbLink>) -> LinkPtr {
    node(ptr).parent.get()
}

fn left(ptr: NonNull<RbLink>) -> LinkPtr {
    node(ptr).left.get()
}

fn right(ptr: NonNull<RbLink>) -> LinkPtr {
    node(ptr).right.get()
}

/// Nil leaves are black.
fn color(ptr: LinkPtr) -> Color {
    ptr.map_or(Color::Black, |ptr| node(ptr).color.get())
}

fn paint(ptr: NonNull<RbLink>, color: Color) {
    node(ptr).color.set(color);
}

fn leftmost(mut ptr: NonNull<RbLink>) -> NonNull<RbLink> {
    while let Some(next) = left(ptr) {
        ptr = next;
    }
    ptr
}

fn rightmost(mut ptr: NonNull<RbLink>) -> NonNull<RbLink> {
    while let Some(next) = right(ptr) {
        ptr = next;
    }
    ptr
}

/// A red-black tree over records of type `T`, ordered by `C`.
pub struct RbTree<T: RbNode, C> {
    root: LinkPtr,
    len: usize,
    cmp: C,
    _marker: PhantomData<*const T>,
}

impl<T, C> RbTree<T, C>
where
    T: RbNode,
    C: Fn(&T, &T) -> Ordering,
{
    pub fn new(cmp: C) -> Self {
        RbTree {
            root: None,
            len: 0,
            cmp,
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    fn record(&self, ptr: NonNull<RbLink>) -> &T {
        // SAFETY: every link in the tree is embedded in a live member.
        unsafe { T::from_link(ptr).as_ref() }
    }

    /// Links `record` at the position of its key and rebalances.
    ///
    /// Returns [`TreeError::DuplicateKey`] and leaves the tree untouched if
    /// an equal record is present.
    ///
    /// # Panics
    ///
    /// If `record` is already linked into a tree.
    ///
    /// # Safety
    ///
    /// `record` must not move nor be dropped until it is removed from the
    /// tree.
    pub unsafe fn insert(&mut self, record: &T) -> Result<(), TreeError> {
        let link = record.rb_link();
        assert!(!link.is_linked(), "rbtree: record is already linked");

        let mut parent = None;
        let mut went_left = false;
        let mut cursor = self.root;
        while let Some(current) = cursor {
            parent = cursor;
            match (self.cmp)(record, self.record(current)) {
                Ordering::Less => {
                    went_left = true;
                    cursor = left(current);
                }
                Ordering::Greater => {
                    went_left = false;
                    cursor = right(current);
                }
                Ordering::Equal => return Err(TreeError::DuplicateKey),
            }
        }

        let new = NonNull::from(link);
        link.parent.set(parent);
        link.left.set(None);
        link.right.set(None);
        link.color.set(Color::Red);
        link.linked.set(true);
        match parent {
            None => self.root = Some(new),
            Some(parent) if went_left => node(parent).left.set(Some(new)),
            Some(parent) => node(parent).right.set(Some(new)),
        }
        self.len += 1;

        self.insert_fixup(new);
        trace!("rbtree: inserted, {} nodes", self.len);
        Ok(())
    }

    fn insert_fixup(&mut self, mut child: NonNull<RbLink>) {
        while let Some(mut parent_ptr) = parent(child) {
            if color(Some(parent_ptr)) == Color::Black {
                break;
            }
            // A red parent is never the root.
            let grandparent = parent(parent_ptr).expect("rbtree: red root");

            if left(grandparent) == Some(parent_ptr) {
                match right(grandparent) {
                    Some(uncle) if color(Some(uncle)) == Color::Red => {
                        paint(parent_ptr, Color::Black);
                        paint(uncle, Color::Black);
                        paint(grandparent, Color::Red);
                        child = grandparent;
                    }
                    _ => {
                        if right(parent_ptr) == Some(child) {
                            self.rotate_left(parent_ptr);
                            std::mem::swap(&mut child, &mut parent_ptr);
                        }
                        paint(parent_ptr, Color::Black);
                        paint(grandparent, Color::Red);
                        self.rotate_right(grandparent);
                    }
                }
            } else {
                match left(grandparent) {
                    Some(uncle) if color(Some(uncle)) == Color::Red => {
                        paint(parent_ptr, Color::Black);
                        paint(uncle, Color::Black);
                        paint(grandparent, Color::Red);
                        child = grandparent;
                    }
                    _ => {
                        if left(parent_ptr) == Some(child) {
                            self.rotate_right(parent_ptr);
                            std::mem::swap(&mut child, &mut parent_ptr);
                        }
                        paint(parent_ptr, Color::Black);
                        paint(grandparent, Color::Red);
                        self.rotate_left(grandparent);
                    }
                }
            }
        }

        if let Some(root) = self.root {
            paint(root, Color::Black);
        }
    }

    /// Unlinks `record` and rebalances.
    ///
    /// # Panics
    ///
    /// If `record` is not linked into this tree.
    pub fn remove(&mut self, record: &T) {
        let link = record.rb_link();
        assert!(link.is_linked(), "rbtree: removing a record that is not linked");
        let target = NonNull::from(link);
        assert!(
            self.owns(target),
            "rbtree: removing a record linked into another tree"
        );

        let mut removed_color = link.color.get();
        let replacement;
        let replacement_parent;

        match (left(target), right(target)) {
            (None, child) => {
                replacement = child;
                replacement_parent = parent(target);
                self.transplant(target, child);
            }
            (child @ Some(_), None) => {
                replacement = child;
                replacement_parent = parent(target);
                self.transplant(target, child);
            }
            (Some(left_child), Some(right_child)) => {
                // Swap in the in-order successor, which has no left child.
                let successor = leftmost(right_child);
                removed_color = node(successor).color.get();
                replacement = right(successor);

                if parent(successor) == Some(target) {
                    replacement_parent = Some(successor);
                } else {
                    replacement_parent = parent(successor);
                    self.transplant(successor, right(successor));
                    node(successor).right.set(Some(right_child));
                    node(right_child).parent.set(Some(successor));
                }

                self.transplant(target, Some(successor));
                node(successor).left.set(Some(left_child));
                node(left_child).parent.set(Some(successor));
                paint(successor, link.color.get());
            }
        }

        link.clear();
        self.len -= 1;

        if removed_color == Color::Black {
            self.remove_fixup(replacement, replacement_parent);
        }
        trace!("rbtree: removed, {} nodes", self.len);
    }

    /// Resolves the extra black carried by `child` after a black node was
    /// unlinked from under `parent_ptr`.
    fn remove_fixup(&mut self, mut child: LinkPtr, mut parent_ptr: LinkPtr) {
        while child != self.root && color(child) == Color::Black {
            let Some(parent_node) = parent_ptr else {
                break;
            };

            if left(parent_node) == child {
                let mut sibling =
                    right(parent_node).expect("rbtree: double black without a sibling");
                if color(Some(sibling)) == Color::Red {
                    paint(sibling, Color::Black);
                    paint(parent_node, Color::Red);
                    self.rotate_left(parent_node);
                    sibling = right(parent_node).expect("rbtree: double black without a sibling");
                }

                if color(left(sibling)) == Color::Black && color(right(sibling)) == Color::Black {
                    paint(sibling, Color::Red);
                    child = Some(parent_node);
                    parent_ptr = parent(parent_node);
                } else {
                    if color(right(sibling)) == Color::Black {
                        if let Some(nephew) = left(sibling) {
                            paint(nephew, Color::Black);
                        }
                        paint(sibling, Color::Red);
                        self.rotate_right(sibling);
                        sibling =
                            right(parent_node).expect("rbtree: double black without a sibling");
                    }
                    paint(sibling, node(parent_node).color.get());
                    paint(parent_node, Color::Black);
                    if let Some(nephew) = right(sibling) {
                        paint(nephew, Color::Black);
                    }
                    self.rotate_left(parent_node);
                    child = self.root;
                    break;
                }
            } else {
                let mut sibling =
                    left(parent_node).expect("rbtree: double black without a sibling");
                if color(Some(sibling)) == Color::Red {
                    paint(sibling, Color::Black);
                    paint(parent_node, Color::Red);
                    self.rotate_right(parent_node);
                    sibling = left(parent_node).expect("rbtree: double black without a sibling");
                }

                if color(left(sibling)) == Color::Black && color(right(sibling)) == Color::Black {
                    paint(sibling, Color::Red);
                    child = Some(parent_node);
                    parent_ptr = parent(parent_node);
                } else {
                    if color(left(sibling)) == Color::Black {
                        if let Some(nephew) = right(sibling) {
                            paint(nephew, Color::Black);
                        }
                        paint(sibling, Color::Red);
                        self.rotate_left(sibling);
                        sibling =
                            left(parent_node).expect("rbtree: double black without a sibling");
                    }
                    paint(sibling, node(parent_node).color.get());
                    paint(parent_node, Color::Black);
                    if let Some(nephew) = left(sibling) {
                        paint(nephew, Color::Black);
                    }
                    self.rotate_right(parent_node);
                    child = self.root;
                    break;
                }
            }
        }

        if let Some(child) = child {
            paint(child, Color::Black);
        }
    }

    fn rotate_left(&mut self, pivot: NonNull<RbLink>) {
        let riser = right(pivot).expect("rbtree: rotate left without a right child");
        node(pivot).right.set(left(riser));
        if let Some(inner) = left(riser) {
            node(inner).parent.set(Some(pivot));
        }
        node(riser).parent.set(parent(pivot));
        self.replace_child(parent(pivot), pivot, Some(riser));
        node(riser).left.set(Some(pivot));
        node(pivot).parent.set(Some(riser));
    }

    fn rotate_right(&mut self, pivot: NonNull<RbLink>) {
        let riser = left(pivot).expect("rbtree: rotate right without a left child");
        node(pivot).left.set(right(riser));
        if let Some(inner) = right(riser) {
            node(inner).parent.set(Some(pivot));
        }
        node(riser).parent.set(parent(pivot));
        self.replace_child(parent(pivot), pivot, Some(riser));
        node(riser).right.set(Some(pivot));
        node(pivot).parent.set(Some(riser));
    }

    fn replace_child(&mut self, parent: LinkPtr, old: NonNull<RbLink>, new: LinkPtr) {
        match parent {
            None => self.root = new,
            Some(parent) if left(parent) == Some(old) => node(parent).left.set(new),
            Some(parent) => node(parent).right.set(new),
        }
    }

    fn transplant(&mut self, old: NonNull<RbLink>, new: LinkPtr) {
        self.replace_child(parent(old), old, new);
        if let Some(new) = new {
            node(new).parent.set(parent(old));
        }
    }

    fn owns(&self, mut ptr: NonNull<RbLink>) -> bool {
        while let Some(up) = parent(ptr) {
            ptr = up;
        }
        self.root == Some(ptr)
    }

    /// Returns the smallest record.
    pub fn first(&self) -> Option<&T> {
        self.root.map(|root| self.record(leftmost(root)))
    }

    /// Returns the largest record.
    pub fn last(&self) -> Option<&T> {
        self.root.map(|root| self.record(rightmost(root)))
    }

    /// Descends the tree with a three-way comparison of the sought key
    /// against each visited record.
    pub fn search<F>(&self, mut f: F) -> Option<&T>
    where
        F: FnMut(&T) -> Ordering,
    {
        let mut cursor = self.root;
        while let Some(current) = cursor {
            let record = self.record(current);
            cursor = match f(record) {
                Ordering::Less => left(current),
                Ordering::Greater => right(current),
                Ordering::Equal => return Some(record),
            };
        }
        None
    }

    /// Returns the record following `record` in key order.
    ///
    /// # Panics
    ///
    /// If `record` is not linked into this tree.
    pub fn successor(&self, record: &T) -> Option<&T> {
        let link = record.rb_link();
        assert!(link.is_linked(), "rbtree: successor of an unlinked record");
        let current = NonNull::from(link);
        assert!(
            self.owns(current),
            "rbtree: successor of a record linked into another tree"
        );

        if let Some(right_child) = right(current) {
            return Some(self.record(leftmost(right_child)));
        }

        let mut child = current;
        let mut ancestor = parent(current);
        while let Some(up) = ancestor {
            if left(up) == Some(child) {
                break;
            }
            child = up;
            ancestor = parent(up);
        }
        ancestor.map(|up| self.record(up))
    }

    pub fn iter(&self) -> Iter<'_, T, C> {
        Iter {
            tree: self,
            next: self.first(),
        }
    }

    /// Checks every structural invariant and returns the black-height.
    pub fn validate(&self) -> Result<usize, TreeError> {
        if color(self.root) == Color::Red {
            return Err(TreeError::RedRoot);
        }
        if self.root.is_some_and(|root| parent(root).is_some()) {
            return Err(TreeError::BrokenParentLink);
        }

        let (counted, black_height) = Self::check_subtree(self.root)?;
        if counted != self.len {
            return Err(TreeError::LengthMismatch {
                counted,
                recorded: self.len,
            });
        }

        let mut previous: Option<&T> = None;
        for record in self.iter() {
            if let Some(previous) = previous {
                if (self.cmp)(previous, record) != Ordering::Less {
                    return Err(TreeError::OutOfOrder);
                }
            }
            previous = Some(record);
        }

        Ok(black_height)
    }

    /// Returns the node count and black-height of a subtree.
    fn check_subtree(ptr: LinkPtr) -> Result<(usize, usize), TreeError> {
        let Some(current) = ptr else {
            return Ok((0, 1));
        };

        for child in [left(current), right(current)].into_iter().flatten() {
            if parent(child) != Some(current) {
                return Err(TreeError::BrokenParentLink);
            }
            if color(Some(current)) == Color::Red && color(Some(child)) == Color::Red {
                return Err(TreeError::RedViolation);
            }
        }

        let (left_count, left_height) = Self::check_subtree(left(current))?;
        let (right_count, right_height) = Self::check_subtree(right(current))?;
        if left_height != right_height {
            return Err(TreeError::BlackHeightMismatch {
                left: left_height,
                right: right_height,
            });
        }

        let own = usize::from(color(Some(current)) == Color::Black);
        Ok((left_count + right_count + 1, left_height + own))
    }
}

/// In-order iterator, walking through [`RbTree::successor`].
pub struct Iter<'a, T: RbNode, C> {
    tree: &'a RbTree<T, C>,
    next: Option<&'a T>,
}

impl<'a, T, C> Iterator for Iter<'a, T, C>
where
    T: RbNode,
    C: Fn(&T, &T) -> Ordering,
{
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.tree.successor(current);
        Some(current)
    }
}
