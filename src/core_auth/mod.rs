pub mod authorizer;
pub mod helper;

pub use authorizer::{
    AuthFailure, Authorizer, AuthorizerError, VirtualAuthorizer, READ_PERMS, WRITE_PERMS,
};
