//! Native guest binding: a Rust function linked into the runner binary.

use std::fmt::Display;

use crate::adapter::{Guest, InvokeError, Reply};
use crate::bridge::envelope::Request;

/// Guest backed by a Rust closure or function.
///
/// Errors are rendered with `Display` for the log; panics are caught by the
/// adapter like any other guest failure.
pub struct FnGuest<F> {
    main: F,
}

impl<F> FnGuest<F> {
    pub fn new(main: F) -> Self {
        Self { main }
    }
}

impl<F, E> Guest for FnGuest<F>
where
    F: FnMut(Request) -> Result<Reply, E>,
    E: Display,
{
    fn invoke(&mut self, request: Request) -> Result<Reply, InvokeError> {
        (self.main)(request).map_err(InvokeError::raised)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn guest_may_keep_its_own_state() {
        let mut calls = 0u32;
        let mut guest = FnGuest::new(move |_req: Request| {
            calls += 1;
            Ok::<_, String>(Reply::new(json!(calls)))
        });
        assert_eq!(guest.invoke(Request::default()).unwrap().value, json!(1));
        assert_eq!(guest.invoke(Request::default()).unwrap().value, json!(2));
    }

    #[test]
    fn errors_are_rendered() {
        let mut guest = FnGuest::new(|_req: Request| Err::<Reply, _>("bad input"));
        let err = guest.invoke(Request::default()).unwrap_err();
        assert_eq!(err.to_string(), "guest raised: bad input");
    }
}
