//! Typed argument tuples.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Payload;
use crate::error::PayloadError;

/// A handler's argument list, as a tuple.
///
/// Implemented for tuples of zero to six elements whose members are
/// serializable. A single argument is written `(value,)`.
pub trait Args: Sized + Send + 'static {
    /// Number of elements in the tuple.
    const ARITY: usize;

    fn into_payload(self) -> Result<Payload, PayloadError>;

    fn from_payload(payload: &[Value]) -> Result<Self, PayloadError>;

    /// Name used to check calls against the registered tuple.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

macro_rules! impl_args {
    ($arity:expr; $($name:ident : $idx:tt),*) => {
        impl<$($name),*> Args for ($($name,)*)
        where
            $($name: Serialize + DeserializeOwned + Send + 'static,)*
        {
            const ARITY: usize = $arity;

            #[allow(unused_mut)]
            fn into_payload(self) -> Result<Payload, PayloadError> {
                let mut payload = Payload::new();
                $(
                    payload.push(
                        serde_json::to_value(&self.$idx)
                            .map_err(|source| PayloadError::Encode { index: $idx, source })?,
                    );
                )*
                Ok(payload)
            }

            fn from_payload(payload: &[Value]) -> Result<Self, PayloadError> {
                if payload.len() != Self::ARITY {
                    return Err(PayloadError::Arity {
                        expected: Self::ARITY,
                        actual: payload.len(),
                    });
                }
                Ok(($(
                    <$name as Deserialize>::deserialize(&payload[$idx])
                        .map_err(|source| PayloadError::Decode { index: $idx, source })?,
                )*))
            }
        }
    };
}

impl_args!(0;);
impl_args!(1; A0: 0);
impl_args!(2; A0: 0, A1: 1);
impl_args!(3; A0: 0, A1: 1, A2: 2);
impl_args!(4; A0: 0, A1: 1, A2: 2, A3: 3);
impl_args!(5; A0: 0, A1: 1, A2: 2, A3: 3, A4: 4);
impl_args!(6; A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5);
