use std::marker::PhantomData;
use std::mem;

/// Status returned by one operator invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    /// The operator can be invoked again
    Running,
    /// The stage should terminate gracefully after publishing this item
    Complete,
    /// The stage should terminate; the item may be unusable
    Error,
}

impl OpStatus {
    /// Combined status of two sequential invocations: an error outranks
    /// completion, completion outranks running.
    pub(crate) fn merge(self, other: OpStatus) -> OpStatus {
        use OpStatus::*;
        match (self, other) {
            (Error, _) | (_, Error) => Error,
            (Complete, _) | (_, Complete) => Complete,
            _ => Running,
        }
    }
}

/// An operator that produces items; the head of a pipeline.
///
/// One invocation populates `output` and reports whether the stream goes
/// on. Typical sources capture from a device, read from disk or generate
/// values.
pub trait Source<O>: Send {
    /// Diagnostic name
    fn name(&self) -> &str {
        "source"
    }

    fn produce(&mut self, output: &mut O) -> OpStatus;
}

/// An operator that consumes one item and produces one item.
///
/// The slots are owned by the caller for exactly the duration of the call:
/// a hosting stage passes borrows of its scratch cells, a direct caller
/// (tests, in-thread composition) passes any cells it owns. The input is
/// mutable so an implementation may cannibalize it — [`Identity`] swaps the
/// two cells outright.
pub trait Transform<I, O>: Send {
    /// Diagnostic name
    fn name(&self) -> &str {
        "transform"
    }

    fn apply(&mut self, input: &mut I, output: &mut O) -> OpStatus;

    /// Chain `next` after this operator.
    ///
    /// The returned operator owns the intermediate cell the value flows
    /// through, so a chain composed once keeps reusing the same storage on
    /// every invocation. Chains nest: `a.then(b).then(c)`.
    fn then<O2, B>(self, next: B) -> Chained<Self, B, O, I, O2>
    where
        Self: Sized,
        B: Transform<O, O2>,
        O: Default + Send,
    {
        Chained::new(self, next)
    }
}

/// An operator that consumes items; the tail of a pipeline.
pub trait Sink<I>: Send {
    /// Diagnostic name
    fn name(&self) -> &str {
        "sink"
    }

    fn consume(&mut self, input: &mut I) -> OpStatus;
}

/// Two transforms run in sequence around an owned intermediate cell.
///
/// Built with [`Transform::then`]. The first operator writes into the
/// intermediate cell, the second reads it, so the downstream input region
/// is the upstream output region.
pub struct Chained<A, B, M, I, O> {
    label: String,
    first: A,
    second: B,
    mid: M,
    _edge: PhantomData<fn(&mut I, &mut O)>,
}

impl<A, B, M, I, O> Chained<A, B, M, I, O>
where
    A: Transform<I, M>,
    B: Transform<M, O>,
    M: Default + Send,
{
    pub fn new(first: A, second: B) -> Self {
        let label = format!("{}+{}", first.name(), second.name());
        Self {
            label,
            first,
            second,
            mid: M::default(),
            _edge: PhantomData,
        }
    }
}

impl<A, B, M, I, O> Transform<I, O> for Chained<A, B, M, I, O>
where
    A: Transform<I, M>,
    B: Transform<M, O>,
    M: Default + Send,
{
    fn name(&self) -> &str {
        &self.label
    }

    fn apply(&mut self, input: &mut I, output: &mut O) -> OpStatus {
        let first = self.first.apply(input, &mut self.mid);
        let second = self.second.apply(&mut self.mid, output);
        first.merge(second)
    }
}

/// A transform that moves its input to its output by swapping the two
/// cells. No copy, no `Clone` bound.
pub struct Identity<T> {
    name: String,
    _cell: PhantomData<fn(&mut T)>,
}

impl<T> Identity<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _cell: PhantomData,
        }
    }
}

impl<T> Transform<T, T> for Identity<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&mut self, input: &mut T, output: &mut T) -> OpStatus {
        mem::swap(input, output);
        OpStatus::Running
    }
}

/// A source wrapping a closure
pub struct FnSource<F, O> {
    name: String,
    f: F,
    _out: PhantomData<fn(&mut O)>,
}

impl<F, O> FnSource<F, O>
where
    F: FnMut(&mut O) -> OpStatus + Send,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
            _out: PhantomData,
        }
    }
}

impl<F, O> Source<O> for FnSource<F, O>
where
    F: FnMut(&mut O) -> OpStatus + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&mut self, output: &mut O) -> OpStatus {
        (self.f)(output)
    }
}

/// A transform wrapping a closure
pub struct FnTransform<F, I, O> {
    name: String,
    f: F,
    _edge: PhantomData<fn(&mut I, &mut O)>,
}

impl<F, I, O> FnTransform<F, I, O>
where
    F: FnMut(&mut I, &mut O) -> OpStatus + Send,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
            _edge: PhantomData,
        }
    }
}

impl<F, I, O> Transform<I, O> for FnTransform<F, I, O>
where
    F: FnMut(&mut I, &mut O) -> OpStatus + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&mut self, input: &mut I, output: &mut O) -> OpStatus {
        (self.f)(input, output)
    }
}

/// A sink wrapping a closure
pub struct FnSink<F, I> {
    name: String,
    f: F,
    _in: PhantomData<fn(&mut I)>,
}

impl<F, I> FnSink<F, I>
where
    F: FnMut(&mut I) -> OpStatus + Send,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
            _in: PhantomData,
        }
    }
}

impl<F, I> Sink<I> for FnSink<F, I>
where
    F: FnMut(&mut I) -> OpStatus + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn consume(&mut self, input: &mut I) -> OpStatus {
        (self.f)(input)
    }
}
