// SPDX-License-Identifier: CC0-1.0

//! Internal macros.
//!
//! Macros meant to be used inside the library only.

macro_rules! impl_consensus_encoding {
    ($thing:ident, $($field:ident),+) => (
        impl crate::consensus::Encodable for $thing {
            #[inline]
            fn consensus_encode<W: std::io::Write + ?Sized>(
                &self,
                w: &mut W,
            ) -> Result<usize, std::io::Error> {
                let mut len = 0;
                $(len += self.$field.consensus_encode(w)?;)+
                Ok(len)
            }
        }

        impl crate::consensus::Decodable for $thing {
            #[inline]
            fn consensus_decode<R: std::io::Read + ?Sized>(
                r: &mut R,
            ) -> Result<$thing, crate::consensus::encode::Error> {
                Ok($thing {
                    $($field: crate::consensus::Decodable::consensus_decode(r)?,)+
                })
            }
        }
    );
}

/// Formats an error message together with its source.
macro_rules! write_err {
    ($writer:expr, $string:literal $(, $args:expr)*; $source:expr) => {
        write!($writer, concat!($string, ": {}") $(, $args)*, $source)
    }
}
