pub trait IntoRaw<T: Clone> {
    fn into_raw(self) -> T;
}

/// A raw wire value that is either one of the variants of `TK`, or a value this crate does not
/// name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownOrRaw<TU: Clone, TK: IntoRaw<TU>> {
    Known(TK),
    Unknown(TU),
}

impl<TU: Clone, TK: IntoRaw<TU>> IntoRaw<TU> for KnownOrRaw<TU, TK> {
    fn into_raw(self) -> TU {
        match self {
            KnownOrRaw::Known(known) => known.into_raw(),
            KnownOrRaw::Unknown(raw) => raw,
        }
    }
}

impl<TU: Clone, TK: IntoRaw<TU> + TryFrom<TU>> From<TU> for KnownOrRaw<TU, TK> {
    fn from(raw: TU) -> Self {
        match TK::try_from(raw.clone()) {
            Ok(known) => KnownOrRaw::Known(known),
            Err(_) => KnownOrRaw::Unknown(raw),
        }
    }
}

/// Implement [IntoRaw] and `TryFrom<Raw>` for a fieldless enum backed by a raw value.
/// The enum must derive [`strum_macros::EnumIter`].
macro_rules! impl_partial_enum {
    ($enum_name:ty, $backing:ty) => {
        impl $crate::nfc::util::IntoRaw<$backing> for $enum_name {
            fn into_raw(self) -> $backing {
                self as $backing
            }
        }
        impl TryFrom<$backing> for $enum_name {
            type Error = ();
            fn try_from(raw: $backing) -> Result<Self, Self::Error> {
                use ::strum::IntoEnumIterator;
                use $crate::nfc::util::IntoRaw;
                Self::iter().find(|&v| v.into_raw() == raw).ok_or(())
            }
        }
    };
}

pub(crate) use impl_partial_enum;

/// Formats a byte slice as contiguous upper-case hex, for APDU logging.
pub struct DisplayBytesAsHex<'a>(&'a [u8]);

impl std::fmt::Debug for DisplayBytesAsHex<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl std::fmt::Display for DisplayBytesAsHex<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl<'a> From<&'a [u8]> for DisplayBytesAsHex<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        DisplayBytesAsHex(bytes)
    }
}
