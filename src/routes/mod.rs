/// Router Module Index
///
/// Routes are split by access level so that protection is applied once per router (as a
/// layer) rather than remembered per handler.

/// Routes open to anonymous clients: health check and the credential endpoints.
pub mod public;

/// Routes behind the authentication gate, each method with its own permission gate.
pub mod authenticated;
