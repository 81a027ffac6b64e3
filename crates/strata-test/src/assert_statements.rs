//! Assertions over statements recorded by a [`RecordingContext`].
//!
//! Needles are matched as substrings of the recorded statement text, so
//! tests can check the shape of generated SQL without spelling it out in
//! full.
//!
//! ## Example
//!
//! ```rust
//! use strata_db::DatabaseContext;
//! use strata_test::{assert_statements_in_order, RecordingContext};
//!
//! # tokio_test::block_on(async {
//! let db = RecordingContext::new("shop");
//! db.terminate_connections("shop").await.unwrap();
//! db.execute_batch("ALTER DATABASE \"shop\" RENAME TO \"shop_backup\"").await.unwrap();
//! assert_statements_in_order(&db, &["TERMINATE shop", "RENAME TO"]);
//! # });
//! ```

use crate::recording::RecordingContext;

/// Asserts that statements containing each needle ran in the given order.
///
/// # Panics
///
/// Panics if a needle is missing or is only found before the previous match.
pub fn assert_statements_in_order(db: &RecordingContext, needles: &[&str]) {
    let sql = db.sql();
    let mut from = 0;
    for needle in needles {
        match sql[from..].iter().position(|s| s.contains(needle)) {
            Some(offset) => from += offset + 1,
            None => panic!(
                "Expected a statement containing {needle:?} after position {from}, \
                 recorded statements: {sql:#?}"
            ),
        }
    }
}

/// Asserts that a statement containing `needle` ran.
///
/// # Panics
///
/// Panics if no recorded statement contains `needle`.
pub fn assert_executed(db: &RecordingContext, needle: &str) {
    assert!(
        db.executed(needle),
        "Expected a statement containing {needle:?}, recorded statements: {:#?}",
        db.sql()
    );
}

/// Asserts that no statement containing `needle` ran.
///
/// # Panics
///
/// Panics if any recorded statement contains `needle`.
pub fn assert_not_executed(db: &RecordingContext, needle: &str) {
    assert!(
        !db.executed(needle),
        "Expected no statement containing {needle:?}, recorded statements: {:#?}",
        db.sql()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_db::DatabaseContext;

    async fn seeded() -> RecordingContext {
        let db = RecordingContext::new("shop");
        db.execute_batch("A").await.unwrap();
        db.execute_batch("B").await.unwrap();
        db.execute_batch("C").await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_in_order_passes() {
        let db = seeded().await;
        assert_statements_in_order(&db, &["A", "C"]);
        assert_executed(&db, "B");
        assert_not_executed(&db, "D");
    }

    #[tokio::test]
    #[should_panic(expected = "Expected a statement containing \"A\"")]
    async fn test_in_order_fails_when_reversed() {
        let db = seeded().await;
        assert_statements_in_order(&db, &["C", "A"]);
    }

    #[tokio::test]
    #[should_panic(expected = "Expected no statement containing \"B\"")]
    async fn test_not_executed_fails() {
        let db = seeded().await;
        assert_not_executed(&db, "B");
    }
}
