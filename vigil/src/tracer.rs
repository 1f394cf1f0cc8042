//! Function tracing across arbitrary signatures
//!
//! A traced target is wrapped in a [`Callable`], a uniform adapter whose
//! arguments and return values travel as boxed [`std::any::Any`] values.
//! The [`traceable!`] macro builds the adapter from ordinary closure
//! syntax and pins down the concrete types; [`trace_args!`] boxes the
//! call-site arguments. [`FunctionTracer`] drives the call: it samples
//! process resources around the invocation, recovers panics raised by the
//! target, and appends one [`FunctionTraceRecord`] per completed or
//! panicked call to the metrics store.
//!
//! Argument downcasts require the exact concrete type that was boxed; a
//! mismatch rejects the call synchronously and records nothing.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TraceError, TraceResult};
use crate::sampler::ResourceSampler;
use crate::store::{MetricRecord, MetricsStore};

/// A value crossing the trace boundary in either direction
pub type BoxedValue = Box<dyn Any + Send>;

/// How a traced call ended
///
/// `ArgumentMismatch` never reaches the store: mismatched calls are
/// rejected synchronously without a record. The variant exists so
/// dashboard consumers share one outcome vocabulary with the error
/// taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceOutcome {
    Completed,
    Panicked,
    ArgumentMismatch,
}

/// Stored form of a value that crossed the trace boundary
///
/// Live values are neither cloneable nor serializable in boxed form, so
/// records keep the type name and a bounded `Debug` rendering instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedValue {
    pub type_name: String,
    pub rendered: String,
}

impl CapturedValue {
    const MAX_RENDERED: usize = 120;

    /// Capture the stored form of a live value
    pub fn of<T: std::fmt::Debug + ?Sized>(value: &T) -> Self {
        let mut rendered = format!("{:?}", value);
        if rendered.len() > Self::MAX_RENDERED {
            let mut cut = Self::MAX_RENDERED;
            while !rendered.is_char_boundary(cut) {
                cut -= 1;
            }
            rendered.truncate(cut);
            rendered.push_str("...");
        }
        Self {
            type_name: std::any::type_name::<T>().to_string(),
            rendered,
        }
    }
}

/// One record per traced call, appended under the call's function key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionTraceRecord {
    pub function_key: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Process CPU percentage points gained across the call
    pub cpu_delta: f32,
    /// Process resident-memory change in bytes; negative when memory was
    /// returned mid-call
    pub heap_alloc_delta: i64,
    /// Process thread-count change across the call
    pub concurrency_delta: i64,
    pub outcome: TraceOutcome,
    /// Stored form of the target's return values. A panicking target
    /// contributes a single substitute entry carrying the panic message.
    pub return_values: Vec<CapturedValue>,
}

impl FunctionTraceRecord {
    /// Wall-clock duration of the call
    pub fn duration(&self) -> Duration {
        (self.end_time - self.start_time)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// What an adapter hands back: live boxed return values plus their stored
/// form, captured while the concrete types were still known
pub struct CallOutput {
    pub returns: Vec<BoxedValue>,
    pub captured: Vec<CapturedValue>,
}

impl CallOutput {
    pub fn empty() -> Self {
        Self {
            returns: Vec::new(),
            captured: Vec::new(),
        }
    }

    pub fn single<T>(value: T) -> Self
    where
        T: std::fmt::Debug + Send + 'static,
    {
        Self {
            captured: vec![CapturedValue::of(&value)],
            returns: vec![Box::new(value)],
        }
    }

    pub fn pair<A, B>(first: A, second: B) -> Self
    where
        A: std::fmt::Debug + Send + 'static,
        B: std::fmt::Debug + Send + 'static,
    {
        Self {
            captured: vec![CapturedValue::of(&first), CapturedValue::of(&second)],
            returns: vec![Box::new(first), Box::new(second)],
        }
    }

    pub fn triple<A, B, C>(first: A, second: B, third: C) -> Self
    where
        A: std::fmt::Debug + Send + 'static,
        B: std::fmt::Debug + Send + 'static,
        C: std::fmt::Debug + Send + 'static,
    {
        Self {
            captured: vec![
                CapturedValue::of(&first),
                CapturedValue::of(&second),
                CapturedValue::of(&third),
            ],
            returns: vec![Box::new(first), Box::new(second), Box::new(third)],
        }
    }
}

/// Uniform adapter around one traced target
///
/// Built with [`traceable!`]; consumed by a single traced call. The
/// declared arity is checked against the supplied arguments before the
/// target runs.
pub struct Callable {
    arity: usize,
    invoke: Box<dyn FnOnce(Vec<BoxedValue>) -> TraceResult<CallOutput> + Send>,
}

impl Callable {
    pub fn new<F>(arity: usize, invoke: F) -> Self
    where
        F: FnOnce(Vec<BoxedValue>) -> TraceResult<CallOutput> + Send + 'static,
    {
        Self {
            arity,
            invoke: Box::new(invoke),
        }
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    fn call(self, args: Vec<BoxedValue>) -> TraceResult<CallOutput> {
        (self.invoke)(args)
    }
}

/// Downcast the next boxed argument to its declared concrete type.
///
/// Support routine for [`traceable!`] expansions; the engine has already
/// matched argument count against arity by the time this runs.
#[doc(hidden)]
pub fn take_arg<T: Send + 'static>(
    args: &mut std::vec::IntoIter<BoxedValue>,
    index: &mut usize,
) -> TraceResult<T> {
    let position = *index;
    *index += 1;

    let value = args.next().ok_or(TraceError::ArityMismatch {
        function: String::new(),
        expected: position + 1,
        actual: position,
    })?;

    match value.downcast::<T>() {
        Ok(typed) => Ok(*typed),
        Err(_) => Err(TraceError::ArgumentMismatch {
            function: String::new(),
            index: position,
            expected: std::any::type_name::<T>(),
        }),
    }
}

/// Build a [`Callable`] from closure syntax.
///
/// Parameters must carry explicit types; those types are what the boxed
/// arguments are downcast to at call time. The return annotation decides
/// how many values the trace records: none for no annotation, one for
/// `-> T`, and one per component for a parenthesized `-> (A, B)` or
/// `-> (A, B, C)`. Parameter and return types must be `Send + 'static`,
/// and return types must also implement `Debug` for the stored form.
///
/// ```
/// use vigil::{trace_args, traceable};
///
/// let add = traceable!(|a: i64, b: i64| -> i64 { a + b });
/// assert_eq!(add.arity(), 2);
/// let args = trace_args![40i64, 2i64];
/// ```
#[macro_export]
macro_rules! traceable {
    (|| -> ($r1:ty, $r2:ty, $r3:ty) $body:block) => {
        $crate::tracer::Callable::new(0, move |_args| {
            let (first, second, third): ($r1, $r2, $r3) = $body;
            Ok($crate::tracer::CallOutput::triple(first, second, third))
        })
    };
    (|| -> ($r1:ty, $r2:ty) $body:block) => {
        $crate::tracer::Callable::new(0, move |_args| {
            let (first, second): ($r1, $r2) = $body;
            Ok($crate::tracer::CallOutput::pair(first, second))
        })
    };
    (|| -> $ret:ty $body:block) => {
        $crate::tracer::Callable::new(0, move |_args| {
            let value: $ret = $body;
            Ok($crate::tracer::CallOutput::single(value))
        })
    };
    (|| $body:block) => {
        $crate::tracer::Callable::new(0, move |_args| {
            let () = $body;
            Ok($crate::tracer::CallOutput::empty())
        })
    };
    (|$($name:ident : $ty:ty),+| -> ($r1:ty, $r2:ty, $r3:ty) $body:block) => {
        $crate::tracer::Callable::new([$(stringify!($name)),+].len(), move |args| {
            let mut args = args.into_iter();
            let mut index = 0usize;
            $(let $name: $ty = $crate::tracer::take_arg::<$ty>(&mut args, &mut index)?;)+
            let (first, second, third): ($r1, $r2, $r3) = $body;
            Ok($crate::tracer::CallOutput::triple(first, second, third))
        })
    };
    (|$($name:ident : $ty:ty),+| -> ($r1:ty, $r2:ty) $body:block) => {
        $crate::tracer::Callable::new([$(stringify!($name)),+].len(), move |args| {
            let mut args = args.into_iter();
            let mut index = 0usize;
            $(let $name: $ty = $crate::tracer::take_arg::<$ty>(&mut args, &mut index)?;)+
            let (first, second): ($r1, $r2) = $body;
            Ok($crate::tracer::CallOutput::pair(first, second))
        })
    };
    (|$($name:ident : $ty:ty),+| -> $ret:ty $body:block) => {
        $crate::tracer::Callable::new([$(stringify!($name)),+].len(), move |args| {
            let mut args = args.into_iter();
            let mut index = 0usize;
            $(let $name: $ty = $crate::tracer::take_arg::<$ty>(&mut args, &mut index)?;)+
            let value: $ret = $body;
            Ok($crate::tracer::CallOutput::single(value))
        })
    };
    (|$($name:ident : $ty:ty),+| $body:block) => {
        $crate::tracer::Callable::new([$(stringify!($name)),+].len(), move |args| {
            let mut args = args.into_iter();
            let mut index = 0usize;
            $(let $name: $ty = $crate::tracer::take_arg::<$ty>(&mut args, &mut index)?;)+
            let () = $body;
            Ok($crate::tracer::CallOutput::empty())
        })
    };
}

/// Box call-site arguments for a traced call.
///
/// Each argument's concrete type must match the corresponding parameter
/// type declared in the [`traceable!`] adapter exactly; widening and
/// other conversions do not happen across the boundary.
#[macro_export]
macro_rules! trace_args {
    () => {
        ::std::vec::Vec::<$crate::tracer::BoxedValue>::new()
    };
    ($($value:expr),+ $(,)?) => {
        vec![$(::std::boxed::Box::new($value) as $crate::tracer::BoxedValue),+]
    };
}

/// Drives traced calls and appends their records to the metrics store
///
/// Cheap to clone; clones share one store and one sampler, and the whole
/// thing is safe to use from any number of threads. Every completed or
/// panicked call appends exactly one record under the call's function
/// key. Calls rejected for a blank key, wrong arity, or a mismatched
/// argument type append nothing.
#[derive(Clone, Debug)]
pub struct FunctionTracer {
    store: Arc<MetricsStore>,
    sampler: Arc<ResourceSampler>,
}

impl FunctionTracer {
    pub fn new(store: Arc<MetricsStore>, sampler: Arc<ResourceSampler>) -> Self {
        Self { store, sampler }
    }

    /// Trace a target that takes no arguments and returns nothing
    pub fn trace(&self, function_key: &str, callable: Callable) -> TraceResult<FunctionTraceRecord> {
        let (record, _returns) = self.run(function_key, callable, Vec::new())?;
        Ok(record)
    }

    /// Trace a target invoked with `args`. Return values are recorded in
    /// stored form but not handed back.
    pub fn trace_with_args(
        &self,
        function_key: &str,
        callable: Callable,
        args: Vec<BoxedValue>,
    ) -> TraceResult<FunctionTraceRecord> {
        let (record, _returns) = self.run(function_key, callable, args)?;
        Ok(record)
    }

    /// Trace a target and hand back its first return value live, or `None`
    /// for a target that returns nothing. A panicking target has its
    /// record appended and yields [`TraceError::TargetPanicked`], since
    /// there is no value to return.
    pub fn trace_with_return(
        &self,
        function_key: &str,
        callable: Callable,
        args: Vec<BoxedValue>,
    ) -> TraceResult<Option<BoxedValue>> {
        let (record, returns) = self.run(function_key, callable, args)?;
        if record.outcome == TraceOutcome::Panicked {
            return Err(panic_error(&record));
        }
        Ok(returns.into_iter().next())
    }

    /// Trace a target and hand back every return value live, in
    /// declaration order. Panics behave as in [`Self::trace_with_return`].
    pub fn trace_with_returns(
        &self,
        function_key: &str,
        callable: Callable,
        args: Vec<BoxedValue>,
    ) -> TraceResult<Vec<BoxedValue>> {
        let (record, returns) = self.run(function_key, callable, args)?;
        if record.outcome == TraceOutcome::Panicked {
            return Err(panic_error(&record));
        }
        Ok(returns)
    }

    fn run(
        &self,
        function_key: &str,
        callable: Callable,
        args: Vec<BoxedValue>,
    ) -> TraceResult<(FunctionTraceRecord, Vec<BoxedValue>)> {
        // Misuse is rejected before the first resource sample.
        if function_key.trim().is_empty() {
            return Err(TraceError::InvalidTarget {
                reason: "function key must not be blank".to_string(),
            });
        }
        if args.len() != callable.arity() {
            return Err(TraceError::ArityMismatch {
                function: function_key.to_string(),
                expected: callable.arity(),
                actual: args.len(),
            });
        }

        let before = self.sampler.snapshot();
        let start_time = Utc::now();

        // The recovery boundary wraps only the adapter and the target
        // inside it; tracer and store code stays outside.
        let invoked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            callable.call(args)
        }));

        let end_time = Utc::now();
        let after = self.sampler.snapshot();

        let (outcome, returns, captured) = match invoked {
            Ok(Ok(output)) => (TraceOutcome::Completed, output.returns, output.captured),
            // A failed downcast means the target never ran; report it to
            // the caller and record nothing.
            Ok(Err(adapter_error)) => return Err(adapter_error.for_function(function_key)),
            Err(payload) => {
                let message = panic_message(payload);
                tracing::warn!("Traced function '{}' panicked: {}", function_key, message);
                let substitute = CapturedValue {
                    type_name: "panic".to_string(),
                    rendered: message,
                };
                (TraceOutcome::Panicked, Vec::new(), vec![substitute])
            }
        };

        let record = FunctionTraceRecord {
            function_key: function_key.to_string(),
            start_time,
            end_time,
            cpu_delta: after.cpu_percent - before.cpu_percent,
            heap_alloc_delta: after.process_memory_bytes as i64
                - before.process_memory_bytes as i64,
            concurrency_delta: after.thread_count - before.thread_count,
            outcome,
            return_values: captured,
        };

        self.store
            .append(function_key, MetricRecord::Trace(record.clone()));
        Ok((record, returns))
    }
}

fn panic_error(record: &FunctionTraceRecord) -> TraceError {
    TraceError::TargetPanicked {
        function: record.function_key.clone(),
        message: record
            .return_values
            .first()
            .map(|value| value.rendered.clone())
            .unwrap_or_default(),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
