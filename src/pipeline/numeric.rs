//! Text-to-float casting registered as SQL functions on the warehouse connection
//!
//! SQLite's own `CAST(x AS REAL)` turns garbage into `0.0`, which would hide
//! bad feed values. These functions make the failure visible instead:
//!
//! - `cast_float64(x)` - errors on unparseable input (aborts the statement)
//! - `try_cast_float64(x)` - NULL on unparseable input
//! - `is_float64(x)` - 1 when `x` is NULL or parseable, else 0
//!
//! NULL always maps to NULL. Non-finite values (`NaN`, `inf`) are unparseable.

use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::Connection;

pub const CAST_FLOAT64: &str = "cast_float64";
pub const TRY_CAST_FLOAT64: &str = "try_cast_float64";
pub const IS_FLOAT64: &str = "is_float64";

/// Parse decimal text the way the feed writes it ("65000.50", "-1.2", "1e12")
pub fn parse_float64(text: &str) -> Option<f64> {
    let value: f64 = text.trim().parse().ok()?;
    value.is_finite().then_some(value)
}

/// `Ok(None)` for NULL, `Err(raw)` when the value cannot be read as a float
fn value_to_float64(value: ValueRef<'_>) -> Result<Option<f64>, String> {
    match value {
        ValueRef::Null => Ok(None),
        ValueRef::Integer(i) => Ok(Some(i as f64)),
        ValueRef::Real(f) if f.is_finite() => Ok(Some(f)),
        ValueRef::Real(f) => Err(f.to_string()),
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            parse_float64(&text).map(Some).ok_or_else(|| text.into_owned())
        }
        ValueRef::Blob(bytes) => Err(format!("<blob {} bytes>", bytes.len())),
    }
}

pub fn register_numeric_functions(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    conn.create_scalar_function(CAST_FLOAT64, 1, flags, |ctx| {
        value_to_float64(ctx.get_raw(0)).map_err(|raw| {
            rusqlite::Error::UserFunctionError(
                format!("Bad float64 value: '{}'", raw).into(),
            )
        })
    })?;

    conn.create_scalar_function(TRY_CAST_FLOAT64, 1, flags, |ctx| {
        Ok(value_to_float64(ctx.get_raw(0)).unwrap_or(None))
    })?;

    conn.create_scalar_function(IS_FLOAT64, 1, flags, |ctx| {
        Ok(value_to_float64(ctx.get_raw(0)).is_ok())
    })?;

    Ok(())
}
