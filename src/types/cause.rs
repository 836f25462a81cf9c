//! The cause algebra: a lossless record of why an effect did not succeed.
//!
//! A [`Cause`] is a tree whose leaves are the three kinds of abnormal
//! termination and whose inner nodes record how they were combined:
//!
//! - `Fail(E)`: an expected, typed failure
//! - `Die(Defect)`: an unexpected defect (panic, invariant violation)
//! - `Interrupt(FiberId)`: cooperative interruption requested by a fiber
//! - `Sequential(l, r)`: `r` happened after `l` (e.g. a finalizer failed
//!   after the body failed)
//! - `Parallel(l, r)`: `l` and `r` happened concurrently
//!
//! `Empty` is the identity of both compositions.
//!
//! # Equality
//!
//! Equality is canonical rather than structural. Both sides are flattened
//! before comparison:
//!
//! - `Empty` children are removed from every composition;
//! - directly nested compositions of the same kind are merged into one
//!   n-ary node, so association does not matter;
//! - a composition left with a single child is replaced by that child.
//!
//! Children of a sequential node then compare as an ordered list and
//! children of a parallel node compare as a multiset. A sequential node is
//! never equal to a parallel node, and neither composition distributes over
//! the other.

use super::id::FiberId;
use core::fmt;
use smallvec::SmallVec;
use std::any::Any;
use std::convert::Infallible;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Payload carried by a [`Cause::Die`].
///
/// A defect is opaque to the typed error channel. It carries a rendered
/// message and, optionally, an arbitrary shared value for callers that want
/// to downcast it. Two defects are equal when their messages are equal.
#[derive(Clone)]
pub struct Defect {
    message: Arc<str>,
    payload: Option<Arc<dyn Any + Send + Sync>>,
}

impl Defect {
    /// Creates a defect with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Arc::from(message.into()),
            payload: None,
        }
    }

    /// Creates a defect carrying a typed payload.
    #[must_use]
    pub fn with_payload<T: Any + Send + Sync>(message: impl Into<String>, payload: T) -> Self {
        Self {
            message: Arc::from(message.into()),
            payload: Some(Arc::new(payload)),
        }
    }

    /// Converts a caught panic into a defect.
    #[must_use]
    pub fn from_panic(panic: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = panic.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with a non-string payload".to_string()
        };
        Self::new(message)
    }

    /// Returns the defect message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the payload downcast to `T`, if one of that type is present.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|p| p.downcast_ref::<T>())
    }

    /// Returns true if this defect carries a payload.
    #[must_use]
    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }
}

impl PartialEq for Defect {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
    }
}

impl Eq for Defect {}

impl fmt::Debug for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Defect").field(&&*self.message).finish()
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<&str> for Defect {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for Defect {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Every way an effect execution can terminate abnormally.
pub enum Cause<E> {
    /// No failure. Identity for both compositions.
    Empty,
    /// An expected, typed failure.
    Fail(E),
    /// An unexpected defect.
    Die(Defect),
    /// Interruption requested by the given fiber.
    Interrupt(FiberId),
    /// The right cause happened after the left one.
    Sequential(Subcause<E>, Subcause<E>),
    /// Both causes happened concurrently.
    Parallel(Subcause<E>, Subcause<E>),
}

/// An owned child of a composition node.
///
/// Dropping a subcause tears its tree down with an explicit stack, so
/// causes of any depth can be dropped.
pub struct Subcause<E>(Box<Cause<E>>);

impl<E> Subcause<E> {
    /// Boxes `cause` as a child.
    #[must_use]
    pub fn new(cause: Cause<E>) -> Self {
        Self(Box::new(cause))
    }

    /// Unboxes the child.
    #[must_use]
    pub fn into_inner(mut self) -> Cause<E> {
        mem::take(&mut *self.0)
    }
}

impl<E> From<Cause<E>> for Subcause<E> {
    fn from(cause: Cause<E>) -> Self {
        Self::new(cause)
    }
}

impl<E> Deref for Subcause<E> {
    type Target = Cause<E>;

    fn deref(&self) -> &Cause<E> {
        &self.0
    }
}

impl<E> DerefMut for Subcause<E> {
    fn deref_mut(&mut self) -> &mut Cause<E> {
        &mut self.0
    }
}

impl<E: Clone> Clone for Subcause<E> {
    fn clone(&self) -> Self {
        Self::new(Cause::clone(self))
    }
}

impl<E: fmt::Debug> fmt::Debug for Subcause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<E> Drop for Subcause<E> {
    fn drop(&mut self) {
        let mut detached = Vec::new();
        detach_children(&mut self.0, &mut detached);
        // Each popped cause has empty children, so its own drop is shallow.
        while let Some(mut cause) = detached.pop() {
            detach_children(&mut cause, &mut detached);
        }
    }
}

fn detach_children<E>(cause: &mut Cause<E>, into: &mut Vec<Cause<E>>) {
    if let Cause::Sequential(l, r) | Cause::Parallel(l, r) = cause {
        into.push(mem::take(&mut *l.0));
        into.push(mem::take(&mut *r.0));
    }
}

/// A leaf of a cause tree, borrowed.
#[derive(Debug, PartialEq, Eq)]
pub enum CauseLeaf<'a, E> {
    /// A typed failure.
    Fail(&'a E),
    /// A defect.
    Die(&'a Defect),
    /// An interruption.
    Interrupt(FiberId),
}

// Manual impls so `E` does not need to be `Clone`/`Copy`.
impl<E> Clone for CauseLeaf<'_, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for CauseLeaf<'_, E> {}

/// A bottom-up fold over a cause tree.
///
/// Every node is reduced by exactly one handler call. Composition handlers
/// receive the already-reduced values of their children, left first.
pub trait CauseReducer<E> {
    /// Result of reducing a subtree.
    type Output;

    /// Reduces an `Empty` node.
    fn empty(&mut self) -> Self::Output;
    /// Reduces a `Fail` node.
    fn fail(&mut self, error: &E) -> Self::Output;
    /// Reduces a `Die` node.
    fn die(&mut self, defect: &Defect) -> Self::Output;
    /// Reduces an `Interrupt` node.
    fn interrupt(&mut self, fiber: FiberId) -> Self::Output;
    /// Combines the reduced children of a `Sequential` node.
    fn sequential(&mut self, left: Self::Output, right: Self::Output) -> Self::Output;
    /// Combines the reduced children of a `Parallel` node.
    fn parallel(&mut self, left: Self::Output, right: Self::Output) -> Self::Output;
}

enum Node<'a, E, Z> {
    Leaf(&'a Cause<E>),
    Sequential(Z, Z),
    Parallel(Z, Z),
}

enum OwnedNode<E, Z> {
    Leaf(Cause<E>),
    Sequential(Z, Z),
    Parallel(Z, Z),
}

fn pop_pair<Z>(done: &mut Vec<Z>) -> (Z, Z) {
    let right = done.pop();
    let left = done.pop();
    let (Some(left), Some(right)) = (left, right) else {
        unreachable!("composition node reduced before its children");
    };
    (left, right)
}

impl<E> Cause<E> {
    /// The empty cause.
    #[must_use]
    pub const fn empty() -> Self {
        Self::Empty
    }

    /// A typed failure.
    #[must_use]
    pub const fn fail(error: E) -> Self {
        Self::Fail(error)
    }

    /// A defect.
    #[must_use]
    pub fn die(defect: impl Into<Defect>) -> Self {
        Self::Die(defect.into())
    }

    /// An interruption by `fiber`.
    #[must_use]
    pub const fn interrupt(fiber: FiberId) -> Self {
        Self::Interrupt(fiber)
    }

    /// Sequential composition. An empty operand is dropped.
    #[must_use]
    pub fn sequential(left: Self, right: Self) -> Self {
        match (left, right) {
            (Self::Empty, r) => r,
            (l, Self::Empty) => l,
            (l, r) => Self::Sequential(l.into(), r.into()),
        }
    }

    /// Parallel composition. An empty operand is dropped.
    #[must_use]
    pub fn parallel(left: Self, right: Self) -> Self {
        match (left, right) {
            (Self::Empty, r) => r,
            (l, Self::Empty) => l,
            (l, r) => Self::Parallel(l.into(), r.into()),
        }
    }

    /// Reduces the cause with `reducer`.
    ///
    /// The traversal uses an explicit stack, so arbitrarily deep causes do
    /// not overflow the call stack.
    pub fn reduce<R: CauseReducer<E>>(&self, reducer: &mut R) -> R::Output {
        self.fold_nodes(|node| match node {
            Node::Leaf(Self::Fail(e)) => reducer.fail(e),
            Node::Leaf(Self::Die(d)) => reducer.die(d),
            Node::Leaf(Self::Interrupt(id)) => reducer.interrupt(*id),
            Node::Leaf(_) => reducer.empty(),
            Node::Sequential(l, r) => reducer.sequential(l, r),
            Node::Parallel(l, r) => reducer.parallel(l, r),
        })
    }

    fn fold_nodes<'a, Z>(&'a self, mut step: impl FnMut(Node<'a, E, Z>) -> Z) -> Z {
        enum Work<'a, E> {
            Visit(&'a Cause<E>),
            Sequential,
            Parallel,
        }

        let mut work = vec![Work::Visit(self)];
        let mut done: Vec<Z> = Vec::new();
        while let Some(item) = work.pop() {
            match item {
                Work::Visit(Self::Sequential(l, r)) => {
                    work.push(Work::Sequential);
                    work.push(Work::Visit(&**r));
                    work.push(Work::Visit(&**l));
                }
                Work::Visit(Self::Parallel(l, r)) => {
                    work.push(Work::Parallel);
                    work.push(Work::Visit(&**r));
                    work.push(Work::Visit(&**l));
                }
                Work::Visit(leaf) => done.push(step(Node::Leaf(leaf))),
                Work::Sequential => {
                    let (left, right) = pop_pair(&mut done);
                    done.push(step(Node::Sequential(left, right)));
                }
                Work::Parallel => {
                    let (left, right) = pop_pair(&mut done);
                    done.push(step(Node::Parallel(left, right)));
                }
            }
        }
        let Some(result) = done.pop() else {
            unreachable!("cause fold produced no result");
        };
        result
    }

    /// Consuming counterpart of `fold_nodes`. Leaves are handed over by value.
    fn into_fold<Z>(self, mut step: impl FnMut(OwnedNode<E, Z>) -> Z) -> Z {
        enum Work<E> {
            Visit(Cause<E>),
            Sequential,
            Parallel,
        }

        let mut work = vec![Work::Visit(self)];
        let mut done: Vec<Z> = Vec::new();
        while let Some(item) = work.pop() {
            match item {
                Work::Visit(Self::Sequential(l, r)) => {
                    work.push(Work::Sequential);
                    work.push(Work::Visit(r.into_inner()));
                    work.push(Work::Visit(l.into_inner()));
                }
                Work::Visit(Self::Parallel(l, r)) => {
                    work.push(Work::Parallel);
                    work.push(Work::Visit(r.into_inner()));
                    work.push(Work::Visit(l.into_inner()));
                }
                Work::Visit(leaf) => done.push(step(OwnedNode::Leaf(leaf))),
                Work::Sequential => {
                    let (left, right) = pop_pair(&mut done);
                    done.push(step(OwnedNode::Sequential(left, right)));
                }
                Work::Parallel => {
                    let (left, right) = pop_pair(&mut done);
                    done.push(step(OwnedNode::Parallel(left, right)));
                }
            }
        }
        let Some(result) = done.pop() else {
            unreachable!("cause fold produced no result");
        };
        result
    }

    /// Iterates over the non-empty leaves, left to right.
    pub fn leaves(&self) -> Leaves<'_, E> {
        Leaves { stack: vec![self] }
    }

    /// Returns true if the cause contains no failure, defect or interruption.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leaves().next().is_none()
    }

    /// Returns true if the cause contains at least one typed failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.leaves().any(|l| matches!(l, CauseLeaf::Fail(_)))
    }

    /// Returns true if the cause contains at least one defect.
    #[must_use]
    pub fn is_die(&self) -> bool {
        self.leaves().any(|l| matches!(l, CauseLeaf::Die(_)))
    }

    /// Returns true if the cause contains at least one interruption.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.leaves().any(|l| matches!(l, CauseLeaf::Interrupt(_)))
    }

    /// Returns true if the cause is non-empty and every leaf is an interruption.
    #[must_use]
    pub fn is_interrupted_only(&self) -> bool {
        let mut any = false;
        for leaf in self.leaves() {
            if !matches!(leaf, CauseLeaf::Interrupt(_)) {
                return false;
            }
            any = true;
        }
        any
    }

    /// Returns true if the cause holds typed failures and nothing else.
    ///
    /// Only such causes are handed to typed error handlers and retry
    /// schedules; defects and interruptions always propagate.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        let mut any = false;
        for leaf in self.leaves() {
            if !matches!(leaf, CauseLeaf::Fail(_)) {
                return false;
            }
            any = true;
        }
        any
    }

    /// All typed failures, in left-to-right order.
    #[must_use]
    pub fn failures(&self) -> Vec<&E> {
        self.leaves()
            .filter_map(|l| match l {
                CauseLeaf::Fail(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    /// All defects, in left-to-right order.
    #[must_use]
    pub fn defects(&self) -> Vec<&Defect> {
        self.leaves()
            .filter_map(|l| match l {
                CauseLeaf::Die(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    /// Ids of all interrupting fibers, in first-seen order, without repeats.
    #[must_use]
    pub fn interruptors(&self) -> Vec<FiberId> {
        let mut ids = Vec::new();
        for leaf in self.leaves() {
            if let CauseLeaf::Interrupt(id) = leaf {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    /// The leftmost typed failure, if any.
    #[must_use]
    pub fn first_failure(&self) -> Option<&E> {
        self.leaves().find_map(|l| match l {
            CauseLeaf::Fail(e) => Some(e),
            _ => None,
        })
    }

    /// Number of non-empty leaves.
    #[must_use]
    pub fn size(&self) -> usize {
        self.leaves().count()
    }

    /// Collapses the cause to its single most relevant leaf.
    ///
    /// Typed failures win over defects, which win over interruptions. This is
    /// the "first error only" view; the full tree stays available through
    /// `Display`.
    #[must_use]
    pub fn squash(&self) -> Option<CauseLeaf<'_, E>> {
        let mut die = None;
        let mut interrupt = None;
        for leaf in self.leaves() {
            match leaf {
                CauseLeaf::Fail(_) => return Some(leaf),
                CauseLeaf::Die(_) if die.is_none() => die = Some(leaf),
                CauseLeaf::Interrupt(_) if interrupt.is_none() => interrupt = Some(leaf),
                _ => {}
            }
        }
        die.or(interrupt)
    }

    /// Extracts the leftmost typed failure, or returns the cause unchanged.
    pub fn failure_or_cause(self) -> Result<E, Self> {
        if !self.is_failure() {
            return Err(self);
        }
        let mut stack = vec![self];
        while let Some(cause) = stack.pop() {
            match cause {
                Self::Fail(e) => return Ok(e),
                Self::Sequential(l, r) | Self::Parallel(l, r) => {
                    stack.push(r.into_inner());
                    stack.push(l.into_inner());
                }
                _ => {}
            }
        }
        unreachable!("is_failure reported a failure that traversal did not find")
    }

    /// Consumes the cause and returns its typed failures, left to right.
    pub fn into_failures(self) -> Vec<E> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(cause) = stack.pop() {
            match cause {
                Self::Fail(e) => out.push(e),
                Self::Sequential(l, r) | Self::Parallel(l, r) => {
                    stack.push(r.into_inner());
                    stack.push(l.into_inner());
                }
                _ => {}
            }
        }
        out
    }

    /// Maps every typed failure, keeping the shape of the tree.
    pub fn map<E2>(self, mut f: impl FnMut(E) -> E2) -> Cause<E2> {
        self.into_fold::<Cause<E2>>(|node| match node {
            OwnedNode::Leaf(Self::Fail(e)) => Cause::Fail(f(e)),
            OwnedNode::Leaf(Self::Die(d)) => Cause::Die(d),
            OwnedNode::Leaf(Self::Interrupt(id)) => Cause::Interrupt(id),
            OwnedNode::Leaf(_) => Cause::Empty,
            OwnedNode::Sequential(l, r) => Cause::Sequential(l.into(), r.into()),
            OwnedNode::Parallel(l, r) => Cause::Parallel(l.into(), r.into()),
        })
    }

    /// Turns every typed failure into a defect carrying the failure as its
    /// payload, so the cause fits a different error type.
    ///
    /// The defect message renders the failure with `Debug`, so distinct
    /// failures stay distinct defects. Handlers that change the error type
    /// use this for causes they may not recover from, such as a failure
    /// racing a defect.
    pub fn failures_into_defects<E2>(self) -> Cause<E2>
    where
        E: fmt::Debug + Any + Send + Sync,
    {
        self.into_fold::<Cause<E2>>(|node| match node {
            OwnedNode::Leaf(Self::Fail(e)) => {
                Cause::Die(Defect::with_payload(format!("unhandled typed failure: {e:?}"), e))
            }
            OwnedNode::Leaf(Self::Die(d)) => Cause::Die(d),
            OwnedNode::Leaf(Self::Interrupt(id)) => Cause::Interrupt(id),
            OwnedNode::Leaf(_) => Cause::Empty,
            OwnedNode::Sequential(l, r) => Cause::Sequential(l.into(), r.into()),
            OwnedNode::Parallel(l, r) => Cause::Parallel(l.into(), r.into()),
        })
    }

    /// Drops the typed payloads, keeping the shape.
    ///
    /// Used where a cause must be observed by code that does not know `E`,
    /// such as scope finalizers.
    pub fn erase(&self) -> Cause<()> {
        self.fold_nodes::<Cause<()>>(|node| match node {
            Node::Leaf(Self::Fail(_)) => Cause::Fail(()),
            Node::Leaf(Self::Die(d)) => Cause::Die(d.clone()),
            Node::Leaf(Self::Interrupt(id)) => Cause::Interrupt(*id),
            Node::Leaf(_) => Cause::Empty,
            Node::Sequential(l, r) => Cause::Sequential(l.into(), r.into()),
            Node::Parallel(l, r) => Cause::Parallel(l.into(), r.into()),
        })
    }

    fn canonical(&self) -> Option<Canon<'_, E>> {
        self.fold_nodes(|node| match node {
            Node::Leaf(Self::Fail(e)) => Some(Canon::Fail(e)),
            Node::Leaf(Self::Die(d)) => Some(Canon::Die(d)),
            Node::Leaf(Self::Interrupt(id)) => Some(Canon::Interrupt(*id)),
            Node::Leaf(_) => None,
            Node::Sequential(l, r) => Canon::join(l, r, false),
            Node::Parallel(l, r) => Canon::join(l, r, true),
        })
    }
}

impl Cause<Infallible> {
    /// Widens a cause that cannot hold typed failures into any error type.
    pub fn widen<E>(self) -> Cause<E> {
        self.map(|never| match never {})
    }
}

impl<E> Cause<Cause<E>> {
    /// Splices every nested cause into the position of its `Fail` leaf.
    #[must_use]
    pub fn flatten(self) -> Cause<E> {
        self.into_fold(|node| match node {
            OwnedNode::Leaf(Self::Fail(inner)) => inner,
            OwnedNode::Leaf(Self::Die(d)) => Cause::Die(d),
            OwnedNode::Leaf(Self::Interrupt(id)) => Cause::Interrupt(id),
            OwnedNode::Leaf(_) => Cause::Empty,
            OwnedNode::Sequential(l, r) => Cause::sequential(l, r),
            OwnedNode::Parallel(l, r) => Cause::parallel(l, r),
        })
    }
}

/// Left-to-right iterator over the leaves of a cause.
#[derive(Debug)]
pub struct Leaves<'a, E> {
    stack: Vec<&'a Cause<E>>,
}

impl<'a, E> Iterator for Leaves<'a, E> {
    type Item = CauseLeaf<'a, E>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(cause) = self.stack.pop() {
            match cause {
                Cause::Empty => {}
                Cause::Fail(e) => return Some(CauseLeaf::Fail(e)),
                Cause::Die(d) => return Some(CauseLeaf::Die(d)),
                Cause::Interrupt(id) => return Some(CauseLeaf::Interrupt(*id)),
                Cause::Sequential(l, r) | Cause::Parallel(l, r) => {
                    self.stack.push(r);
                    self.stack.push(l);
                }
            }
        }
        None
    }
}

/// Flattened form used for equality.
enum Canon<'a, E> {
    Fail(&'a E),
    Die(&'a Defect),
    Interrupt(FiberId),
    Sequential(Vec<Self>),
    Parallel(Vec<Self>),
}

impl<'a, E> Canon<'a, E> {
    fn join(left: Option<Self>, right: Option<Self>, parallel: bool) -> Option<Self> {
        let mut children = Vec::with_capacity(2);
        for mut child in [left, right].into_iter().flatten() {
            let nested = match &mut child {
                Self::Parallel(items) if parallel => Some(items),
                Self::Sequential(items) if !parallel => Some(items),
                _ => None,
            };
            if let Some(items) = nested {
                children.append(items);
            } else {
                children.push(child);
            }
        }
        match children.len() {
            0 => None,
            1 => children.pop(),
            _ if parallel => Some(Self::Parallel(children)),
            _ => Some(Self::Sequential(children)),
        }
    }
}

impl<E> Drop for Canon<'_, E> {
    fn drop(&mut self) {
        let mut detached = match self {
            Self::Sequential(items) | Self::Parallel(items) => mem::take(items),
            _ => return,
        };
        while let Some(mut node) = detached.pop() {
            if let Self::Sequential(items) | Self::Parallel(items) = &mut node {
                detached.append(items);
            }
        }
    }
}

/// A composition whose children are being compared.
enum Pending<'c, 'a, E> {
    /// Sequential children, compared position by position.
    Ordered {
        left: &'c [Canon<'a, E>],
        right: &'c [Canon<'a, E>],
        next: usize,
    },
    /// Parallel children, matched as a multiset. `left[next]` is being
    /// tried against `right[candidate]`.
    Unordered {
        left: &'c [Canon<'a, E>],
        right: &'c [Canon<'a, E>],
        used: SmallVec<[bool; 8]>,
        next: usize,
        candidate: usize,
    },
}

enum Step<'c, 'a, E> {
    Compare(&'c Canon<'a, E>, &'c Canon<'a, E>),
    Done(bool),
}

impl<'c, 'a, E> Pending<'c, 'a, E> {
    /// Advances with the outcome of the last child comparison, or `None`
    /// right after the frame was opened.
    fn resume(&mut self, outcome: Option<bool>) -> Step<'c, 'a, E> {
        match self {
            Self::Ordered { left, right, next } => {
                let (left, right) = (*left, *right);
                match outcome {
                    Some(false) => return Step::Done(false),
                    Some(true) => *next += 1,
                    None => {}
                }
                match (left.get(*next), right.get(*next)) {
                    (Some(l), Some(r)) => Step::Compare(l, r),
                    _ => Step::Done(true),
                }
            }
            Self::Unordered {
                left,
                right,
                used,
                next,
                candidate,
            } => {
                let (left, right) = (*left, *right);
                match outcome {
                    Some(true) => {
                        used[*candidate] = true;
                        *next += 1;
                        *candidate = 0;
                    }
                    Some(false) => *candidate += 1,
                    None => {}
                }
                let Some(l) = left.get(*next) else {
                    return Step::Done(true);
                };
                while used.get(*candidate).is_some_and(|taken| *taken) {
                    *candidate += 1;
                }
                right.get(*candidate).map_or(Step::Done(false), |r| Step::Compare(l, r))
            }
        }
    }
}

impl<'a, E: PartialEq> Canon<'a, E> {
    /// Compares two canonical trees with an explicit stack of pending
    /// compositions.
    fn equals(&self, other: &Self) -> bool {
        let mut pending = Vec::new();
        let mut outcome = Self::open(self, other, &mut pending);
        while let Some(top) = pending.last_mut() {
            match top.resume(outcome) {
                Step::Compare(l, r) => outcome = Self::open(l, r, &mut pending),
                Step::Done(equal) => {
                    pending.pop();
                    outcome = Some(equal);
                }
            }
        }
        outcome.unwrap_or(false)
    }

    /// Compares leaves directly. Compositions of the same kind and arity
    /// push a frame and return `None`.
    fn open<'c>(left: &'c Self, right: &'c Self, pending: &mut Vec<Pending<'c, 'a, E>>) -> Option<bool> {
        match (left, right) {
            (Self::Fail(a), Self::Fail(b)) => Some(a == b),
            (Self::Die(a), Self::Die(b)) => Some(a == b),
            (Self::Interrupt(a), Self::Interrupt(b)) => Some(a == b),
            (Self::Sequential(a), Self::Sequential(b)) if a.len() == b.len() => {
                pending.push(Pending::Ordered {
                    left: a.as_slice(),
                    right: b.as_slice(),
                    next: 0,
                });
                None
            }
            (Self::Parallel(a), Self::Parallel(b)) if a.len() == b.len() => {
                pending.push(Pending::Unordered {
                    left: a.as_slice(),
                    right: b.as_slice(),
                    used: SmallVec::from_elem(false, b.len()),
                    next: 0,
                    candidate: 0,
                });
                None
            }
            _ => Some(false),
        }
    }
}

impl<E: PartialEq> PartialEq for Cause<E> {
    fn eq(&self, other: &Self) -> bool {
        match (self.canonical(), other.canonical()) {
            (None, None) => true,
            (Some(a), Some(b)) => a.equals(&b),
            _ => false,
        }
    }
}

impl<E: Eq> Eq for Cause<E> {}

impl<E> Default for Cause<E> {
    fn default() -> Self {
        Self::Empty
    }
}

impl<E: Clone> Clone for Cause<E> {
    fn clone(&self) -> Self {
        self.fold_nodes::<Self>(|node| match node {
            Node::Leaf(Self::Fail(e)) => Self::Fail(e.clone()),
            Node::Leaf(Self::Die(d)) => Self::Die(d.clone()),
            Node::Leaf(Self::Interrupt(id)) => Self::Interrupt(*id),
            Node::Leaf(_) => Self::Empty,
            Node::Sequential(l, r) => Self::Sequential(l.into(), r.into()),
            Node::Parallel(l, r) => Self::Parallel(l.into(), r.into()),
        })
    }
}

impl<E: fmt::Debug> fmt::Debug for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self.fold_nodes(|node| match node {
            Node::Leaf(Self::Fail(e)) => format!("Fail({e:?})"),
            Node::Leaf(Self::Die(d)) => format!("Die({d:?})"),
            Node::Leaf(Self::Interrupt(id)) => format!("Interrupt({id:?})"),
            Node::Leaf(_) => "Empty".to_string(),
            Node::Sequential(l, r) => format!("Sequential({l}, {r})"),
            Node::Parallel(l, r) => format!("Parallel({l}, {r})"),
        });
        f.write_str(&rendered)
    }
}

impl<E: fmt::Display> fmt::Display for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self.fold_nodes(|node| match node {
            Node::Leaf(Self::Fail(e)) => format!("Fail({e})"),
            Node::Leaf(Self::Die(d)) => format!("Die({d})"),
            Node::Leaf(Self::Interrupt(id)) => format!("Interrupt({id})"),
            Node::Leaf(_) => "Empty".to_string(),
            Node::Sequential(l, r) => format!("Sequential({l}, {r})"),
            Node::Parallel(l, r) => format!("Parallel({l}, {r})"),
        });
        f.write_str(&rendered)
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for Cause<E> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail(s: &'static str) -> Cause<&'static str> {
        Cause::fail(s)
    }

    fn seq<E>(l: Cause<E>, r: Cause<E>) -> Cause<E> {
        Cause::Sequential(l.into(), r.into())
    }

    fn par<E>(l: Cause<E>, r: Cause<E>) -> Cause<E> {
        Cause::Parallel(l.into(), r.into())
    }

    struct Rebuild;

    impl<E: Clone> CauseReducer<E> for Rebuild {
        type Output = Cause<E>;

        fn empty(&mut self) -> Cause<E> {
            Cause::Empty
        }
        fn fail(&mut self, error: &E) -> Cause<E> {
            Cause::Fail(error.clone())
        }
        fn die(&mut self, defect: &Defect) -> Cause<E> {
            Cause::Die(defect.clone())
        }
        fn interrupt(&mut self, fiber: FiberId) -> Cause<E> {
            Cause::Interrupt(fiber)
        }
        fn sequential(&mut self, left: Cause<E>, right: Cause<E>) -> Cause<E> {
            seq(left, right)
        }
        fn parallel(&mut self, left: Cause<E>, right: Cause<E>) -> Cause<E> {
            par(left, right)
        }
    }

    #[derive(Default)]
    struct CountCalls {
        calls: usize,
    }

    impl<E> CauseReducer<E> for CountCalls {
        type Output = ();

        fn empty(&mut self) {
            self.calls += 1;
        }
        fn fail(&mut self, _: &E) {
            self.calls += 1;
        }
        fn die(&mut self, _: &Defect) {
            self.calls += 1;
        }
        fn interrupt(&mut self, _: FiberId) {
            self.calls += 1;
        }
        fn sequential(&mut self, (): (), (): ()) {
            self.calls += 1;
        }
        fn parallel(&mut self, (): (), (): ()) {
            self.calls += 1;
        }
    }

    #[test]
    fn empty_is_identity_for_both_compositions() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("empty_is_identity_for_both_compositions");

        let a = par(fail("a"), Cause::die("boom"));
        assert_eq!(seq(a.clone(), Cause::Empty), a);
        assert_eq!(seq(Cause::Empty, a.clone()), a);
        assert_eq!(par(a.clone(), Cause::Empty), a);
        assert_eq!(par(Cause::Empty, a.clone()), a);
        assert_eq!(Cause::sequential(a.clone(), Cause::Empty), a);
        assert!(seq(Cause::<()>::Empty, Cause::Empty).is_empty());
        crate::test_complete!("empty_is_identity_for_both_compositions");
    }

    #[test]
    fn association_does_not_matter() {
        let (a, b, c) = (fail("a"), fail("b"), fail("c"));
        assert_eq!(
            seq(seq(a.clone(), b.clone()), c.clone()),
            seq(a.clone(), seq(b.clone(), c.clone()))
        );
        assert_eq!(par(par(a.clone(), b.clone()), c.clone()), par(a, par(b, c)));
    }

    #[test]
    fn sequential_is_ordered_parallel_is_not() {
        let (a, b) = (fail("a"), fail("b"));
        assert_ne!(seq(a.clone(), b.clone()), seq(b.clone(), a.clone()));
        assert_eq!(par(a.clone(), b.clone()), par(b, a));
    }

    #[test]
    fn parallel_is_a_multiset() {
        let (a, b) = (fail("a"), fail("b"));
        assert_ne!(par(a.clone(), a.clone()), par(a.clone(), b.clone()));
        assert_ne!(par(a.clone(), par(a.clone(), b.clone())), par(a.clone(), b.clone()));
        assert_eq!(par(a.clone(), par(b.clone(), a.clone())), par(par(a.clone(), a), b));
    }

    #[test]
    fn compositions_do_not_mix_or_distribute() {
        let (a, b, c) = (fail("a"), fail("b"), fail("c"));
        assert_ne!(seq(a.clone(), b.clone()), par(a.clone(), b.clone()));
        assert_ne!(
            seq(a.clone(), par(b.clone(), c.clone())),
            par(seq(a.clone(), b), seq(a, c))
        );
    }

    #[test]
    fn leaves_compare_by_value() {
        assert_eq!(Cause::<()>::interrupt(FiberId::from_raw(3)), Cause::interrupt(FiberId::from_raw(3)));
        assert_ne!(Cause::<()>::interrupt(FiberId::from_raw(3)), Cause::interrupt(FiberId::from_raw(4)));
        assert_eq!(Cause::<()>::die("x"), Cause::die(Defect::with_payload("x", 5_u8)));
        assert_ne!(Cause::<()>::die("x"), Cause::Empty);
        assert_ne!(fail("x"), Cause::die("x"));
    }

    #[test]
    fn failures_are_left_to_right() {
        let cause = par(fail("x"), fail("y"));
        assert_eq!(cause.failures(), vec![&"x", &"y"]);

        let nested = seq(par(fail("a"), Cause::die("d1")), seq(fail("b"), Cause::die("d2")));
        assert_eq!(nested.failures(), vec![&"a", &"b"]);
        let defects: Vec<&str> = nested.defects().iter().map(|d| d.message()).collect();
        assert_eq!(defects, vec!["d1", "d2"]);
        assert_eq!(nested.clone().into_failures(), vec!["a", "b"]);
        assert_eq!(nested.size(), 4);
    }

    #[test]
    fn predicates() {
        let id = FiberId::from_raw(9);
        let c = par(fail("a"), Cause::interrupt(id));
        assert!(c.is_failure());
        assert!(c.is_interrupted());
        assert!(!c.is_die());
        assert!(!c.is_recoverable());
        assert!(!c.is_interrupted_only());
        assert_eq!(c.interruptors(), vec![id]);

        assert!(fail("a").is_recoverable());
        assert!(par(Cause::<()>::interrupt(id), Cause::interrupt(id)).is_interrupted_only());
        assert!(!Cause::<()>::Empty.is_interrupted_only());
        assert!(Cause::<()>::Empty.is_empty());
    }

    #[test]
    fn reduce_with_rebuild_is_identity() {
        let cause = seq(
            par(fail("a"), Cause::Empty),
            par(Cause::die("boom"), seq(Cause::interrupt(FiberId::from_raw(1)), fail("b"))),
        );
        let rebuilt = cause.reduce(&mut Rebuild);
        assert_eq!(rebuilt, cause);
    }

    #[test]
    fn reduce_invokes_one_handler_per_node() {
        let cause = seq(par(fail("a"), Cause::Empty), fail("b"));
        let mut counter = CountCalls::default();
        cause.reduce(&mut counter);
        assert_eq!(counter.calls, 5);
    }

    #[test]
    fn reduce_is_stack_safe() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("reduce_is_stack_safe");

        let mut cause: Cause<u32> = Cause::fail(0);
        for i in 1..100_000 {
            cause = seq(cause, Cause::fail(i));
        }
        let mut counter = CountCalls::default();
        cause.reduce(&mut counter);
        crate::assert_with_log!(
            counter.calls == 199_999,
            "one call per node",
            199_999,
            counter.calls
        );
        assert_eq!(cause.first_failure(), Some(&0));
        drop(cause);
        crate::test_complete!("reduce_is_stack_safe");
    }

    #[test]
    fn squash_prefers_failures() {
        let id = FiberId::from_raw(2);
        let c = par(Cause::interrupt(id), par(Cause::die("d"), fail("f")));
        assert_eq!(c.squash(), Some(CauseLeaf::Fail(&"f")));
        let c = par(Cause::<()>::interrupt(id), Cause::die("d"));
        assert!(matches!(c.squash(), Some(CauseLeaf::Die(d)) if d.message() == "d"));
        assert_eq!(Cause::<()>::Empty.squash(), None);
    }

    #[test]
    fn failure_or_cause_extracts_first_failure() {
        assert_eq!(par(Cause::die("d"), fail("f")).failure_or_cause(), Ok("f"));
        let c: Cause<&str> = Cause::die("d");
        assert_eq!(c.clone().failure_or_cause(), Err(c));
    }

    #[test]
    fn map_and_widen_keep_shape() {
        let c = seq(fail("a"), Cause::die("d"));
        let mapped = c.map(str::len);
        assert_eq!(mapped, seq(Cause::fail(1), Cause::die("d")));

        let never: Cause<Infallible> = par(Cause::die("x"), Cause::interrupt(FiberId::from_raw(1)));
        let widened: Cause<String> = never.widen();
        assert!(widened.is_die() && widened.is_interrupted());
        assert_eq!(seq(fail("a"), Cause::die("d")).erase(), seq(Cause::fail(()), Cause::die("d")));
    }

    #[test]
    fn display_keeps_full_structure() {
        let c = seq(par(fail("a"), fail("b")), Cause::interrupt(FiberId::from_raw(4)));
        assert_eq!(c.to_string(), "Sequential(Parallel(Fail(a), Fail(b)), Interrupt(#4))");
    }

    #[test]
    fn defect_from_panic_payloads() {
        let err = std::panic::catch_unwind(|| panic!("kaboom")).unwrap_err();
        assert_eq!(Defect::from_panic(&*err).message(), "kaboom");
        let err = std::panic::catch_unwind(|| panic!("{} {}", "formatted", 1)).unwrap_err();
        assert_eq!(Defect::from_panic(&*err).message(), "formatted 1");
        let err = std::panic::catch_unwind(|| std::panic::panic_any(7_u32)).unwrap_err();
        assert_eq!(Defect::from_panic(&*err).message(), "panic with a non-string payload");

        let d = Defect::with_payload("typed", 42_i32);
        assert_eq!(d.downcast_ref::<i32>(), Some(&42));
        assert!(d.downcast_ref::<u8>().is_none());
        assert!(!Defect::new("plain").has_payload());
    }

    #[test]
    fn failures_become_defects_with_payload() {
        let c: Cause<&'static str> = par(fail("lost"), Cause::die("boom"));
        let converted: Cause<u8> = c.failures_into_defects();
        assert!(!converted.is_failure());
        let defects = converted.defects();
        assert_eq!(defects.len(), 2);
        assert_eq!(defects[0].downcast_ref::<&str>(), Some(&"lost"));
        assert_eq!(defects[0].message(), "unhandled typed failure: \"lost\"");
        assert_eq!(defects[1].message(), "boom");
    }

    #[test]
    fn distinct_failures_stay_distinct_as_defects() {
        let a: Cause<u8> = fail("a").failures_into_defects();
        let b: Cause<u8> = fail("b").failures_into_defects();
        assert_ne!(a, b);
        assert_eq!(a, fail("a").failures_into_defects());
    }

    #[test]
    fn debug_renders_the_tree() {
        let c = seq(fail("a"), par(Cause::die("d"), Cause::Empty));
        assert_eq!(format!("{c:?}"), "Sequential(Fail(\"a\"), Parallel(Die(Defect(\"d\")), Empty))");
    }

    #[test]
    fn flatten_splices_nested_causes() {
        let nested: Cause<Cause<&str>> = Cause::sequential(
            Cause::fail(Cause::parallel(Cause::fail("a"), Cause::die("d"))),
            Cause::interrupt(FiberId::from_raw(4)),
        );
        let flat = nested.flatten();
        assert_eq!(
            flat,
            Cause::sequential(
                Cause::parallel(Cause::fail("a"), Cause::die("d")),
                Cause::interrupt(FiberId::from_raw(4)),
            )
        );
        assert_eq!(Cause::<Cause<u8>>::fail(Cause::Empty).flatten(), Cause::Empty);
    }
}
