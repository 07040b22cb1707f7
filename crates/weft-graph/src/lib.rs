pub mod compiled;
pub mod edge;
pub mod executor;
pub mod node;
pub mod state;
pub mod state_graph;
pub mod stream;
pub mod subgraph;
pub mod time_travel;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use weft_checkpoint::prelude::GraphOutput;

    pub use crate::compiled::CompiledStateGraph;
    pub use crate::edge::{Branch, ConditionalEdge, Edge, FanOutEdge, Target};
    pub use crate::executor::Executor;
    pub use crate::graph_enum;
    pub use crate::node::{NodeFn, NodeName, RouteLabel};
    pub use crate::state::{Reducer, StateDelta, StateSchema};
    pub use crate::state_graph::{CompileOptions, StateGraph};
    pub use crate::stream::EventStream;
    pub use crate::subgraph::{SubgraphNode, subgraph_node};
    pub use crate::time_travel::{fork_thread, get_state_history, replay_to_step};
}
