//! Helper macros for PDU encoding and decoding

#[macro_export]
macro_rules! ensure_size {
    (in: $buf:ident, size: $expected:expr) => {{
        let received = $buf.len();
        let expected = $expected;
        if received < expected {
            return Err($crate::PduError::NotEnoughBytes { received, expected });
        }
    }};
}

/// Like [`ensure_size!`], using the `FIXED_PART_SIZE` constant of the current struct.
#[macro_export]
macro_rules! ensure_fixed_part_size {
    (in: $buf:ident) => {{
        $crate::ensure_size!(in: $buf, size: Self::FIXED_PART_SIZE)
    }};
}

/// Asserts that the traits support dynamic dispatch.
///
/// From <https://docs.rs/static_assertions/1.1.0/src/static_assertions/assert_obj_safe.rs.html#72-76>
#[macro_export]
macro_rules! assert_obj_safe {
    ($($xs:path),+ $(,)?) => {
        $(const _: Option<&dyn $xs> = None;)+
    };
}

/// Safely casts a length to a narrower integer type.
#[macro_export]
macro_rules! cast_length {
    ($field:expr, $len:expr) => {{
        $len.try_into().map_err(|_| $crate::PduError::InvalidField {
            field: $field,
            reason: "value out of range",
        })
    }};
}
