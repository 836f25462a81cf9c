//! Terminal result of running an effect.

use super::cause::{Cause, Defect};
use super::id::FiberId;
use core::fmt;

/// Either a success value or the [`Cause`] of the failure.
///
/// A fiber publishes its exit exactly once. Awaiters each receive a clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit<A, E> {
    /// The effect succeeded.
    Success(A),
    /// The effect failed; the cause records why.
    Failure(Cause<E>),
}

impl<A, E> Exit<A, E> {
    /// A successful exit.
    #[must_use]
    pub const fn succeed(value: A) -> Self {
        Self::Success(value)
    }

    /// An exit failed with a typed error.
    #[must_use]
    pub const fn fail(error: E) -> Self {
        Self::Failure(Cause::Fail(error))
    }

    /// An exit failed with an arbitrary cause.
    #[must_use]
    pub const fn fail_cause(cause: Cause<E>) -> Self {
        Self::Failure(cause)
    }

    /// An exit failed with a defect.
    #[must_use]
    pub fn die(defect: impl Into<Defect>) -> Self {
        Self::Failure(Cause::die(defect))
    }

    /// An exit interrupted by `fiber`.
    #[must_use]
    pub const fn interrupt(fiber: FiberId) -> Self {
        Self::Failure(Cause::Interrupt(fiber))
    }

    /// Returns true if this is a success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns true if this is a failure of any kind.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    /// Returns true if the failure cause contains an interruption.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Failure(c) if c.is_interrupted())
    }

    /// Eliminates the exit with one handler per variant.
    pub fn match_exit<R>(
        self,
        on_success: impl FnOnce(A) -> R,
        on_failure: impl FnOnce(Cause<E>) -> R,
    ) -> R {
        match self {
            Self::Success(a) => on_success(a),
            Self::Failure(c) => on_failure(c),
        }
    }

    /// Maps the success value.
    pub fn map<B>(self, f: impl FnOnce(A) -> B) -> Exit<B, E> {
        match self {
            Self::Success(a) => Exit::Success(f(a)),
            Self::Failure(c) => Exit::Failure(c),
        }
    }

    /// Maps every typed failure in the cause.
    pub fn map_error<E2>(self, f: impl FnMut(E) -> E2) -> Exit<A, E2> {
        match self {
            Self::Success(a) => Exit::Success(a),
            Self::Failure(c) => Exit::Failure(c.map(f)),
        }
    }

    /// Borrows the success value.
    #[must_use]
    pub const fn value(&self) -> Option<&A> {
        match self {
            Self::Success(a) => Some(a),
            Self::Failure(_) => None,
        }
    }

    /// Borrows the failure cause.
    #[must_use]
    pub const fn cause(&self) -> Option<&Cause<E>> {
        match self {
            Self::Success(_) => None,
            Self::Failure(c) => Some(c),
        }
    }

    /// Converts into a `Result`, keeping the whole cause on failure.
    pub fn into_result(self) -> Result<A, Cause<E>> {
        match self {
            Self::Success(a) => Ok(a),
            Self::Failure(c) => Err(c),
        }
    }

    /// Combines two exits from effects that ran one after the other.
    pub fn zip_seq<B>(self, other: Exit<B, E>) -> Exit<(A, B), E> {
        self.zip_with(other, Cause::sequential)
    }

    /// Combines two exits from effects that ran concurrently.
    pub fn zip_par<B>(self, other: Exit<B, E>) -> Exit<(A, B), E> {
        self.zip_with(other, Cause::parallel)
    }

    fn zip_with<B>(
        self,
        other: Exit<B, E>,
        combine: impl FnOnce(Cause<E>, Cause<E>) -> Cause<E>,
    ) -> Exit<(A, B), E> {
        match (self, other) {
            (Self::Success(a), Exit::Success(b)) => Exit::Success((a, b)),
            (Self::Failure(l), Exit::Success(_)) => Exit::Failure(l),
            (Self::Success(_), Exit::Failure(r)) => Exit::Failure(r),
            (Self::Failure(l), Exit::Failure(r)) => Exit::Failure(combine(l, r)),
        }
    }

    /// Drops the success value and the typed payloads, keeping the shape.
    #[must_use]
    pub fn erase(&self) -> Exit<(), ()> {
        match self {
            Self::Success(_) => Exit::Success(()),
            Self::Failure(c) => Exit::Failure(c.erase()),
        }
    }
}

impl<A, E> From<Result<A, E>> for Exit<A, E> {
    fn from(result: Result<A, E>) -> Self {
        match result {
            Ok(a) => Self::Success(a),
            Err(e) => Self::fail(e),
        }
    }
}

impl<A: fmt::Debug, E: fmt::Display> fmt::Display for Exit<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(a) => write!(f, "Success({a:?})"),
            Self::Failure(c) => write!(f, "Failure({c})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_round_trips_success() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("match_round_trips_success");

        let v = Exit::<i32, String>::succeed(42).match_exit(|x| x, |_| -1);
        crate::assert_with_log!(v == 42, "match returns the value", 42, v);
        let v = Exit::<i32, String>::fail("no".into()).match_exit(|x| x, |c| c.size() as i32);
        assert_eq!(v, 1);
        crate::test_complete!("match_round_trips_success");
    }

    #[test]
    fn predicates_and_accessors() {
        let ok: Exit<u8, ()> = Exit::succeed(1);
        assert!(ok.is_success() && !ok.is_failure());
        assert_eq!(ok.value(), Some(&1));
        assert!(ok.cause().is_none());

        let interrupted: Exit<u8, ()> = Exit::interrupt(FiberId::from_raw(5));
        assert!(interrupted.is_interrupted());
        assert_eq!(
            interrupted.cause(),
            Some(&Cause::Interrupt(FiberId::from_raw(5)))
        );

        let died: Exit<u8, ()> = Exit::die("bad");
        assert!(died.is_failure() && !died.is_interrupted());
    }

    #[test]
    fn map_and_map_error() {
        let ok: Exit<u8, &str> = Exit::succeed(2);
        assert_eq!(ok.map(|x| x * 10), Exit::succeed(20));
        let bad: Exit<u8, &str> = Exit::fail("abc");
        assert_eq!(bad.map_error(str::len), Exit::fail(3));
    }

    #[test]
    fn zip_combines_causes() {
        let a: Exit<u8, &str> = Exit::fail("a");
        let b: Exit<u8, &str> = Exit::fail("b");
        assert_eq!(
            a.clone().zip_par(b.clone()),
            Exit::Failure(Cause::parallel(Cause::fail("a"), Cause::fail("b")))
        );
        assert_eq!(
            a.clone().zip_seq(b),
            Exit::Failure(Cause::sequential(Cause::fail("a"), Cause::fail("b")))
        );
        assert_eq!(
            Exit::<u8, &str>::succeed(1).zip_par(Exit::succeed(2)),
            Exit::succeed((1, 2))
        );
        assert_eq!(Exit::succeed(1).zip_seq(a), Exit::<(u8, u8), _>::fail("a"));
    }

    #[test]
    fn result_conversions() {
        let exit: Exit<u8, &str> = Ok(3).into();
        assert_eq!(exit.into_result(), Ok(3));
        let exit: Exit<u8, &str> = Err("e").into();
        assert_eq!(exit.into_result(), Err(Cause::fail("e")));
    }

    #[test]
    fn display_renders_cause() {
        let exit: Exit<u8, &str> = Exit::fail("oops");
        assert_eq!(exit.to_string(), "Failure(Fail(oops))");
        assert_eq!(Exit::<u8, &str>::succeed(1).to_string(), "Success(1)");
    }
}
