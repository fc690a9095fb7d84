// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A minimal "open enum": a transparent newtype over an integer with named
//! associated constants. Unlike a Rust `enum`, any bit pattern read from
//! hardware is a valid value, so decoding a register never panics.

/// Declares an open enum.
///
/// ```ignore
/// open_enum! {
///     /// Docs.
///     pub enum Example: u8 {
///         FOO = 0x01,
///         BAR = 0x02,
///     }
/// }
/// ```
///
/// `Debug` prints the constant name for known values and the raw number
/// otherwise.
macro_rules! open_enum {
    (
        $(#[$attr:meta])*
        $vis:vis enum $name:ident : $repr:ty {
            $(#![$inner:meta])*
            $(
                $(#[$vattr:meta])*
                $variant:ident = $value:expr,
            )*
        }
    ) => {
        $(#[$attr])*
        #[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(transparent)]
        $vis struct $name(pub $repr);

        $(#[$inner])*
        impl $name {
            $(
                $(#[$vattr])*
                pub const $variant: $name = $name($value);
            )*
        }

        impl core::fmt::Debug for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                #![allow(unreachable_patterns)] // aliases share a value
                match *self {
                    $(Self::$variant => f.pad(stringify!($variant)),)*
                    _ => core::fmt::Debug::fmt(&self.0, f),
                }
            }
        }
    };
}

pub(crate) use open_enum;
