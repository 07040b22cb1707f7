use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use weft_core::config::RunnableConfig;
use weft_core::error::Result;
use weft_core::runnable::Runnable;

/// The closed set of node names of one graph.
///
/// Usually implemented with [`graph_enum!`](crate::graph_enum).
pub trait NodeName: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Name used in events and checkpoints.
    fn as_str(&self) -> &'static str;

    /// Every variant, in declaration order.
    fn all() -> &'static [Self];

    fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|n| n.as_str() == name)
    }
}

/// The closed set of labels a conditional router may return.
pub trait RouteLabel: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    fn all() -> &'static [Self];
}

impl RouteLabel for bool {
    fn all() -> &'static [Self] {
        &[true, false]
    }
}

/// Declare a fieldless enum usable as node names and route labels.
///
/// ```
/// weft_graph::graph_enum! {
///     pub enum Step {
///         Fetch => "fetch",
///         Store => "store",
///     }
/// }
/// use weft_graph::node::NodeName;
/// assert_eq!(Step::from_name("store"), Some(Step::Store));
/// ```
#[macro_export]
macro_rules! graph_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant),+
        }

        impl $crate::node::NodeName for $name {
            fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            fn all() -> &'static [Self] {
                &[$($name::$variant),+]
            }
        }

        impl $crate::node::RouteLabel for $name {
            fn all() -> &'static [Self] {
                &[$($name::$variant),+]
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str($crate::node::NodeName::as_str(self))
            }
        }
    };
}

/// Node behaviour as stored in a graph: JSON state in, partial update out.
pub type DynNode = dyn Runnable<Input = Value, Output = Value>;

type AsyncNodeFn =
    dyn Fn(Value, RunnableConfig) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>>
        + Send
        + Sync;

/// A graph node that wraps an async function operating on JSON state.
#[derive(Clone)]
pub struct NodeFn {
    func: Arc<AsyncNodeFn>,
}

impl NodeFn {
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(Value, RunnableConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            func: Arc::new(move |input, config| Box::pin(func(input, config))),
        }
    }
}

#[async_trait]
impl Runnable for NodeFn {
    type Input = Value;
    type Output = Value;

    async fn invoke(&self, state: Value, config: &RunnableConfig) -> Result<Value> {
        (self.func)(state, config.clone()).await
    }
}
