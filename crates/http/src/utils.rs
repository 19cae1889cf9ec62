//! Internal helper macros.

/// Early-returns `$error` when `$predicate` does not hold.
///
/// Like `assert!`, but produces an `Err` instead of a panic; used for
/// limit checks on the parse path where every failure is an outcome,
/// never an exception.
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
