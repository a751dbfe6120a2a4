pub mod arguments;
pub mod ellipsis;
pub mod error;
pub mod phi;
pub mod promote;
pub mod propagate;

// Re-export commonly used types
pub use arguments::{localise_components, localise_exp, set_sig_arguments, update_arguments};
pub use ellipsis::process_ellipsis;
pub use error::PassError;
pub use phi::{run_phi_simplification, simplify_phis, PhiSimplifyReport};
pub use promote::try_convert_to_direct;
pub use propagate::propagate_statements;
