//! Exception region model: table, construction, normalization, verification
//!
//! The region table is built once per unit from raw clauses ([`clauses`]),
//! canonicalized by the normalizer ([`normalize`]), and after that treated as
//! read-only by everything downstream. [`succ`] answers "where can control go,
//! counting thrown exceptions" on top of the table; [`verify`] re-derives the
//! whole structure the slow way and is the regression oracle for all of it.

pub mod clauses;
pub mod normalize;
pub mod succ;
pub mod table;
pub mod verify;
