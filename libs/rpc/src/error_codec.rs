//! Mapping between domain errors and wire statuses.
//!
//! The preferred way to describe a domain error is [`StatusMapping`]: one
//! exhaustive `match` per direction, so the compiler flags a new variant
//! that has no status yet. [`RuleCodec`] covers the cases where the mapping
//! is assembled at runtime from partial, ordered rules.

use std::convert::Infallible;
use std::fmt;
use std::marker::PhantomData;

use constellation_core::{Code, Status};
use thiserror::Error;

/// Bidirectional mapping between a closed set of domain errors and statuses
///
/// `from_status` is allowed to be partial; `None` means the status is not
/// an error of this domain. For every variant `e`,
/// `from_status(&to_status(&e))` must give `e` back.
pub trait ErrorCodec<E>: Send + Sync {
    fn to_status(&self, error: &E) -> Status;

    fn from_status(&self, status: &Status) -> Option<E>;
}

/// Domain errors that know their own status mapping
pub trait StatusMapping: Sized {
    fn to_status(&self) -> Status;

    fn from_status(status: &Status) -> Option<Self>;
}

/// [`ErrorCodec`] backed by a type's [`StatusMapping`]
pub struct Mapped<E>(PhantomData<fn() -> E>);

impl<E> Mapped<E> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<E> Default for Mapped<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for Mapped<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for Mapped<E> {}

impl<E> fmt::Debug for Mapped<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mapped<{}>", std::any::type_name::<E>())
    }
}

impl<E: StatusMapping> ErrorCodec<E> for Mapped<E> {
    fn to_status(&self, error: &E) -> Status {
        error.to_status()
    }

    fn from_status(&self, status: &Status) -> Option<E> {
        E::from_status(status)
    }
}

/// Codec for endpoints that declare no domain errors
#[derive(Debug, Clone, Copy, Default)]
pub struct NoErrors;

impl ErrorCodec<Infallible> for NoErrors {
    fn to_status(&self, error: &Infallible) -> Status {
        match *error {}
    }

    fn from_status(&self, _status: &Status) -> Option<Infallible> {
        None
    }
}

type Encoder<E> = Box<dyn Fn(&E) -> Option<Status> + Send + Sync>;
type Decoder<E> = Box<dyn Fn(&Status) -> Option<E> + Send + Sync>;

/// One partial mapping rule: covers some errors and some statuses
pub struct StatusRule<E> {
    encode: Encoder<E>,
    decode: Decoder<E>,
}

impl<E> StatusRule<E> {
    pub fn new<F, G>(encode: F, decode: G) -> Self
    where
        F: Fn(&E) -> Option<Status> + Send + Sync + 'static,
        G: Fn(&Status) -> Option<E> + Send + Sync + 'static,
    {
        Self {
            encode: Box::new(encode),
            decode: Box::new(decode),
        }
    }

    /// Rule tying a group of errors to `code`, with the description carrying
    /// the error's payload
    ///
    /// `select` picks the errors this rule covers and returns the description
    /// to send; `rebuild` turns a received description back into the error.
    pub fn on_code<F, G>(code: Code, select: F, rebuild: G) -> Self
    where
        F: Fn(&E) -> Option<String> + Send + Sync + 'static,
        G: Fn(&str) -> E + Send + Sync + 'static,
    {
        Self::new(
            move |error| select(error).map(|description| Status::new(code, description)),
            move |status| {
                (status.code() == code).then(|| rebuild(status.description().unwrap_or("")))
            },
        )
    }
}

/// Ordered list of partial rules
///
/// When several rules cover the same error or status, the one added first
/// wins. An error no rule covers becomes `UNKNOWN` with the error's text as
/// the description.
pub struct RuleCodec<E> {
    rules: Vec<StatusRule<E>>,
}

impl<E> RuleCodec<E> {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule with lower priority than the ones already present
    pub fn rule(mut self, rule: StatusRule<E>) -> Self {
        self.rules.push(rule);
        self
    }

    /// Left-biased union: rules of `self` take precedence over `fallback`
    pub fn or_else(mut self, fallback: RuleCodec<E>) -> Self {
        self.rules.extend(fallback.rules);
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<E> Default for RuleCodec<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: fmt::Display> ErrorCodec<E> for RuleCodec<E> {
    fn to_status(&self, error: &E) -> Status {
        self.rules
            .iter()
            .find_map(|rule| (rule.encode)(error))
            .unwrap_or_else(|| Status::unknown(error.to_string()))
    }

    fn from_status(&self, status: &Status) -> Option<E> {
        self.rules.iter().find_map(|rule| (rule.decode)(status))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{variant} encodes to {status} which decodes to {decoded}")]
pub struct RoundTripFailure {
    pub variant: String,
    pub status: Status,
    pub decoded: String,
}

/// Check `from_status(to_status(e)) == Some(e)` for every listed variant
///
/// Reports the first variant that does not survive the trip.
pub fn check_round_trip<E, C>(codec: &C, variants: &[E]) -> Result<(), RoundTripFailure>
where
    E: PartialEq + fmt::Debug,
    C: ErrorCodec<E> + ?Sized,
{
    for variant in variants {
        let status = codec.to_status(variant);
        let decoded = codec.from_status(&status);
        if decoded.as_ref() != Some(variant) {
            return Err(RoundTripFailure {
                variant: format!("{:?}", variant),
                status,
                decoded: format!("{:?}", decoded),
            });
        }
    }
    Ok(())
}
