//! Conversion traits between native values and host handles.
//!
//! - [`ToHost`]: turn a native value into a new host object
//! - [`FromHost`]: read a native value out of a host object
//! - [`IntoCallOutput`]: what a bound function may return
//!
//! ## Supported Types
//!
//! - Unit: `()` (host `None`)
//! - Boolean: `bool`
//! - Integers: `i8`..`i64`, `u8`..`u64`, `isize`, `usize` (range-checked)
//! - Floats: `f32`, `f64` (host ints widen)
//! - Strings: `String`, `&str` (to host only)
//! - Handles: `Handle`, `TupleView`, `DictView`
//! - `Option<T>`, `Vec<T>` (as a tuple), Rust tuples up to four elements
//! - `Rc<T>` for exposed types, see [`crate::exposition`]
//!
//! New types plug in by implementing the two traits; dispatch is purely static.

use hostbind_runtime::{self as rt, ObjectKind};

use crate::error::{BridgeError, BridgeResult};
use crate::handle::Handle;
use crate::views::{DictView, TupleView};

/// Convert a native value into a host object.
pub trait ToHost {
    fn to_host(self) -> BridgeResult<Handle>;
}

/// Read a native value out of a host object.
///
/// `site` names where the value came from (an argument position, a method)
/// and is reported in conversion errors.
pub trait FromHost: Sized {
    fn from_host(handle: &Handle, site: Option<&str>) -> BridgeResult<Self>;
}

pub(crate) fn site_name(site: Option<&str>) -> &str {
    site.unwrap_or("value")
}

fn mismatch(handle: &Handle, site: Option<&str>, expected: &str) -> BridgeError {
    BridgeError::conversion(site_name(site), expected, handle.type_name())
}

// ============================================================================
// Unit and bool
// ============================================================================

impl ToHost for () {
    fn to_host(self) -> BridgeResult<Handle> {
        Ok(Handle::none())
    }
}

impl FromHost for () {
    fn from_host(handle: &Handle, site: Option<&str>) -> BridgeResult<Self> {
        if handle.is_none() {
            Ok(())
        } else {
            Err(mismatch(handle, site, "None"))
        }
    }
}

impl ToHost for bool {
    fn to_host(self) -> BridgeResult<Handle> {
        Handle::adopt_at(rt::new_bool(self), "bool")
    }
}

impl FromHost for bool {
    fn from_host(handle: &Handle, site: Option<&str>) -> BridgeResult<Self> {
        if handle.kind() != Some(ObjectKind::Bool) {
            return Err(mismatch(handle, site, "bool"));
        }
        rt::as_bool(handle.ptr()).ok_or_else(|| BridgeError::pending(site_name(site)))
    }
}

// ============================================================================
// Integers
// ============================================================================

fn read_int(handle: &Handle, site: Option<&str>) -> BridgeResult<i64> {
    match handle.kind() {
        Some(ObjectKind::Int | ObjectKind::Bool) => {
            rt::as_int(handle.ptr()).ok_or_else(|| BridgeError::pending(site_name(site)))
        }
        _ => Err(mismatch(handle, site, "int")),
    }
}

macro_rules! impl_int {
    ($($ty:ty),*) => {
        $(
            impl ToHost for $ty {
                fn to_host(self) -> BridgeResult<Handle> {
                    let value = i64::try_from(self).map_err(|_| BridgeError::Overflow {
                        site: "return value".to_string(),
                        value: self as i128,
                        target: "int",
                    })?;
                    Handle::adopt_at(rt::new_int(value), "int")
                }
            }

            impl FromHost for $ty {
                fn from_host(handle: &Handle, site: Option<&str>) -> BridgeResult<Self> {
                    let value = read_int(handle, site)?;
                    <$ty>::try_from(value).map_err(|_| BridgeError::Overflow {
                        site: site_name(site).to_string(),
                        value: value as i128,
                        target: stringify!($ty),
                    })
                }
            }
        )*
    };
}

impl_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

// ============================================================================
// Floats
// ============================================================================

fn read_float(handle: &Handle, site: Option<&str>) -> BridgeResult<f64> {
    match handle.kind() {
        Some(ObjectKind::Float | ObjectKind::Int | ObjectKind::Bool) => {
            rt::as_float(handle.ptr()).ok_or_else(|| BridgeError::pending(site_name(site)))
        }
        _ => Err(mismatch(handle, site, "float")),
    }
}

impl ToHost for f64 {
    fn to_host(self) -> BridgeResult<Handle> {
        Handle::adopt_at(rt::new_float(self), "float")
    }
}

impl FromHost for f64 {
    fn from_host(handle: &Handle, site: Option<&str>) -> BridgeResult<Self> {
        read_float(handle, site)
    }
}

impl ToHost for f32 {
    fn to_host(self) -> BridgeResult<Handle> {
        f64::from(self).to_host()
    }
}

impl FromHost for f32 {
    fn from_host(handle: &Handle, site: Option<&str>) -> BridgeResult<Self> {
        read_float(handle, site).map(|v| v as f32)
    }
}

// ============================================================================
// Strings
// ============================================================================

impl ToHost for &str {
    fn to_host(self) -> BridgeResult<Handle> {
        Handle::adopt_at(rt::new_str(self), "str")
    }
}

impl ToHost for String {
    fn to_host(self) -> BridgeResult<Handle> {
        self.as_str().to_host()
    }
}

impl FromHost for String {
    fn from_host(handle: &Handle, site: Option<&str>) -> BridgeResult<Self> {
        if handle.kind() != Some(ObjectKind::Str) {
            return Err(mismatch(handle, site, "str"));
        }
        rt::as_string(handle.ptr()).ok_or_else(|| BridgeError::pending(site_name(site)))
    }
}

// ============================================================================
// Handles and views
// ============================================================================

impl ToHost for Handle {
    fn to_host(self) -> BridgeResult<Handle> {
        Ok(self)
    }
}

impl ToHost for &Handle {
    fn to_host(self) -> BridgeResult<Handle> {
        Ok(self.clone())
    }
}

impl FromHost for Handle {
    fn from_host(handle: &Handle, _site: Option<&str>) -> BridgeResult<Self> {
        Ok(handle.clone())
    }
}

impl ToHost for TupleView {
    fn to_host(self) -> BridgeResult<Handle> {
        Ok(self.into_handle())
    }
}

impl FromHost for TupleView {
    fn from_host(handle: &Handle, site: Option<&str>) -> BridgeResult<Self> {
        TupleView::new(handle.clone(), site_name(site))
    }
}

impl ToHost for DictView {
    fn to_host(self) -> BridgeResult<Handle> {
        Ok(self.into_handle())
    }
}

impl FromHost for DictView {
    fn from_host(handle: &Handle, site: Option<&str>) -> BridgeResult<Self> {
        DictView::from_handle(handle.clone(), site_name(site))
    }
}

// ============================================================================
// Containers
// ============================================================================

impl<T: ToHost> ToHost for Option<T> {
    fn to_host(self) -> BridgeResult<Handle> {
        match self {
            Some(value) => value.to_host(),
            None => Ok(Handle::none()),
        }
    }
}

impl<T: FromHost> FromHost for Option<T> {
    fn from_host(handle: &Handle, site: Option<&str>) -> BridgeResult<Self> {
        if handle.is_none() {
            Ok(None)
        } else {
            T::from_host(handle, site).map(Some)
        }
    }
}

impl<T: ToHost> ToHost for Vec<T> {
    fn to_host(self) -> BridgeResult<Handle> {
        let tuple = TupleView::make_empty(self.len())?;
        for (i, value) in self.into_iter().enumerate() {
            tuple.set(i, &value.to_host()?)?;
        }
        Ok(tuple.into_handle())
    }
}

impl<T: FromHost> FromHost for Vec<T> {
    fn from_host(handle: &Handle, site: Option<&str>) -> BridgeResult<Self> {
        let tuple = TupleView::new(handle.clone(), site_name(site))?;
        tuple
            .iter()
            .map(|item| T::from_host(&item?, site))
            .collect()
    }
}

macro_rules! impl_tuple {
    ($len:expr; $($name:ident : $idx:tt),+) => {
        impl<$($name: ToHost),+> ToHost for ($($name,)+) {
            fn to_host(self) -> BridgeResult<Handle> {
                TupleView::make(self).map(TupleView::into_handle)
            }
        }

        impl<$($name: FromHost),+> FromHost for ($($name,)+) {
            fn from_host(handle: &Handle, site: Option<&str>) -> BridgeResult<Self> {
                let tuple = TupleView::new(handle.clone(), site_name(site))?;
                if tuple.size() != $len {
                    return Err(BridgeError::conversion(
                        site_name(site),
                        format!("tuple of length {}", $len),
                        format!("tuple of length {}", tuple.size()),
                    ));
                }
                Ok(($($name::from_host(&tuple.get($idx)?, site)?,)+))
            }
        }
    };
}

impl_tuple!(1; A0: 0);
impl_tuple!(2; A0: 0, A1: 1);
impl_tuple!(3; A0: 0, A1: 1, A2: 2);
impl_tuple!(4; A0: 0, A1: 1, A2: 2, A3: 3);

// ============================================================================
// Call output
// ============================================================================

/// Return types a bound function may have: any [`ToHost`] value, or a
/// `Result` whose error converts into [`BridgeError`].
pub trait IntoCallOutput {
    fn into_output(self) -> BridgeResult<Handle>;
}

impl<T: ToHost> IntoCallOutput for T {
    fn into_output(self) -> BridgeResult<Handle> {
        self.to_host()
    }
}

impl<T: ToHost, E: Into<BridgeError>> IntoCallOutput for Result<T, E> {
    fn into_output(self) -> BridgeResult<Handle> {
        self.map_err(Into::into)?.to_host()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: ToHost + FromHost + Clone>(value: T) -> T {
        let handle = value.to_host().unwrap();
        T::from_host(&handle, None).unwrap()
    }

    #[test]
    fn scalars_round_trip() {
        assert!(round_trip(true));
        assert_eq!(round_trip(-5i32), -5);
        assert_eq!(round_trip(u64::from(u32::MAX)), u64::from(u32::MAX));
        assert_eq!(round_trip(1.25f64), 1.25);
        assert_eq!(round_trip(String::from("héllo")), "héllo");
        round_trip(());
    }

    #[test]
    fn narrowing_overflow_names_target() {
        let big = 300i64.to_host().unwrap();
        let err = u8::from_host(&big, Some("argument 1")).unwrap_err();
        assert_eq!(
            err,
            BridgeError::Overflow {
                site: "argument 1".to_string(),
                value: 300,
                target: "u8",
            }
        );
        assert_eq!(err.exception_kind(), rt::ExceptionKind::OverflowError);
    }

    #[test]
    fn negative_into_unsigned_overflows() {
        let neg = (-1i64).to_host().unwrap();
        assert!(matches!(
            usize::from_host(&neg, None),
            Err(BridgeError::Overflow { target: "usize", .. })
        ));
    }

    #[test]
    fn u64_beyond_host_range_does_not_convert() {
        let err = u64::MAX.to_host().unwrap_err();
        assert_eq!(err.exception_kind(), rt::ExceptionKind::OverflowError);
    }

    #[test]
    fn ints_widen_to_float_but_not_back() {
        let three = 3i64.to_host().unwrap();
        assert_eq!(f64::from_host(&three, None).unwrap(), 3.0);

        let half = 0.5f64.to_host().unwrap();
        let err = i64::from_host(&half, Some("x")).unwrap_err();
        assert_eq!(err, BridgeError::conversion("x", "int", "float"));
    }

    #[test]
    fn string_mismatch_reports_actual_type() {
        let n = 1i64.to_host().unwrap();
        let err = String::from_host(&n, Some("name")).unwrap_err();
        assert_eq!(err.to_string(), "name: expected str, got int");
    }

    #[test]
    fn option_maps_none() {
        let none: Option<i32> = None;
        let handle = none.to_host().unwrap();
        assert!(handle.is_none());
        assert_eq!(Option::<i32>::from_host(&handle, None).unwrap(), None);
        assert_eq!(round_trip(Some(4i32)), Some(4));
    }

    #[test]
    fn vec_becomes_tuple() {
        let handle = vec![1.0f64, 2.0, 3.5].to_host().unwrap();
        assert!(handle.is_tuple());
        assert_eq!(Vec::<f64>::from_host(&handle, None).unwrap(), vec![1.0, 2.0, 3.5]);
    }

    #[test]
    fn large_sequence_converts_in_one_pass() {
        let values: Vec<i64> = (0..100_000).collect();
        let handle = values.clone().to_host().unwrap();
        let view = TupleView::new(handle.clone(), "seq").unwrap();
        assert_eq!(view.size(), values.len());
        assert_eq!(Vec::<i64>::from_host(&handle, None).unwrap(), values);
    }

    #[test]
    fn rust_tuples_check_length() {
        let handle = (1i32, String::from("a")).to_host().unwrap();
        let (n, s) = <(i32, String)>::from_host(&handle, None).unwrap();
        assert_eq!((n, s.as_str()), (1, "a"));

        let err = <(i32, i32, i32)>::from_host(&handle, Some("dims")).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Conversion { ref expected, .. } if expected == "tuple of length 3"
        ));
    }

    #[test]
    fn result_output_propagates_error() {
        let ok: Result<i32, BridgeError> = Ok(2);
        assert!(ok.into_output().is_ok());

        let failed: Result<i32, BridgeError> = Err(BridgeError::native("nope"));
        assert_eq!(failed.into_output().unwrap_err(), BridgeError::native("nope"));
    }

    #[test]
    fn converted_handle_has_single_share() {
        let handle = 99i64.to_host().unwrap();
        assert_eq!(handle.refcount(), 1);
    }
}
