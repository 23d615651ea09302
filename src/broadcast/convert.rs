//! Value conversion between producer and listener types

use std::fmt::Display;
use std::sync::Arc;

/// Outcome of converting one producer value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conversion<T> {
    /// Deliver the converted value to every listener
    Deliver(T),
    /// Drop the value; this is an expected outcome, not a fault
    Drop,
    /// Drop the value because conversion failed
    Fail(String),
}

impl<T> From<Option<T>> for Conversion<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Conversion::Deliver(value),
            None => Conversion::Drop,
        }
    }
}

impl<T, E: Display> From<Result<T, E>> for Conversion<T> {
    fn from(value: Result<T, E>) -> Self {
        match value {
            Ok(value) => Conversion::Deliver(value),
            Err(err) => Conversion::Fail(err.to_string()),
        }
    }
}

/// Shared conversion function applied on the engine's control loop
pub type Converter<In, Out> = Arc<dyn Fn(In) -> Conversion<Out> + Send + Sync>;

/// Converter that passes values through unchanged
pub fn identity<T: 'static>() -> Converter<T, T> {
    Arc::new(Conversion::Deliver)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_option() {
        assert_eq!(Conversion::from(Some(3)), Conversion::Deliver(3));
        assert_eq!(Conversion::<i32>::from(None), Conversion::Drop);
    }

    #[test]
    fn test_from_result() {
        let ok: Result<i32, String> = Ok(1);
        let err: Result<i32, String> = Err("not a number".into());

        assert_eq!(Conversion::from(ok), Conversion::Deliver(1));
        assert_eq!(
            Conversion::from(err),
            Conversion::Fail("not a number".into())
        );
    }

    #[test]
    fn test_identity() {
        let convert = identity::<&str>();
        assert_eq!(convert("x"), Conversion::Deliver("x"));
    }
}
