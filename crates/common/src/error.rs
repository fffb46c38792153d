/// Trait for error types that can be constructed from a plain message string.
///
/// Implement this for your crate's error type, then invoke [`impl_context!`]
/// in your error module to get `.context()` and `.with_context()` on `Result`
/// and `Option`.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;
}

/// Generate a crate-local `Context` trait with `.context()` and `.with_context()`
/// methods on `Result` and `Option`.
///
/// Invoke inside a module that defines `Error: FromMessage` and
/// `type Result<T> = std::result::Result<T, Error>`.
///
/// ```ignore
/// // in crates/foo/src/error.rs
/// parley_common::impl_context!();
/// ```
#[macro_export]
macro_rules! impl_context {
    () => {
        pub trait Context<T> {
            fn context(self, context: impl Into<String>) -> Result<T>;
            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C;
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                let ctx = context.into();
                self.map_err(|source| {
                    <Error as $crate::FromMessage>::from_message(format!("{ctx}: {source}"))
                })
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.map_err(|source| {
                    let ctx = f().into();
                    <Error as $crate::FromMessage>::from_message(format!("{ctx}: {source}"))
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn context(self, context: impl Into<String>) -> Result<T> {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(context.into()))
            }

            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_message(f().into()))
            }
        }
    };
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    #[derive(Debug, PartialEq)]
    struct Error(String);

    impl crate::FromMessage for Error {
        fn from_message(message: String) -> Self {
            Self(message)
        }
    }

    type Result<T> = std::result::Result<T, Error>;

    crate::impl_context!();

    #[test]
    fn context_prefixes_the_source() {
        let failed: std::result::Result<(), &str> = Err("disk full");
        assert_eq!(
            failed.context("failed to save").unwrap_err(),
            Error("failed to save: disk full".into())
        );
        let ok: std::result::Result<u8, &str> = Ok(7);
        assert_eq!(ok.with_context(|| "unused").unwrap(), 7);
    }

    #[test]
    fn missing_option_becomes_the_message() {
        let missing: Option<u8> = None;
        assert_eq!(
            missing.with_context(|| format!("no bot named {}", "ai")).unwrap_err(),
            Error("no bot named ai".into())
        );
        assert_eq!(Some(1).context("unused").unwrap(), 1);
    }
}
