use thiserror::Error;

pub type Result<T> = std::result::Result<T, AutogradError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AutogradError {
    /// An operation was applied outside of its domain, e.g. `log` of a non-positive value.
    #[error("{op} is not defined for {value}")]
    Domain { op: &'static str, value: f64 },

    /// A requested source has no path to the differentiated output.
    #[error("Term `{name}` is not used to compute the output. Set `materialize_grads` to get zero instead.")]
    UnusedInput { name: String },

    /// The backward pass reached a node whose graph was released by a previous backward pass.
    #[error("Graph through `{name}` was already consumed by a backward pass. Set `retain_graph` to backpropagate more than once.")]
    GraphConsumed { name: String },

    /// A backward pass with `create_graph` reached a user function that cannot build its
    /// derivative out of terms.
    #[error("`{op}` has no graph rule, so it cannot be differentiated with `create_graph`. Implement `UnaryFn::backward` for it.")]
    NoGraphRule { op: String },

    #[error("Terms belong to a different tape")]
    TapeMismatch,
}
