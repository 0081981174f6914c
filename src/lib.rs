//! # cbranch: conditional-aware C symbol analysis
//!
//! **`cbranch`** is a static analyzer for C source code that parses every
//! preprocessor configuration simultaneously. Instead of fixing a set of
//! macro definitions, it forks its parsing state at each `#if`/`#ifdef`
//! conditional into *compilation branches*, parses each branch
//! independently, and joins branches back together once their parser
//! state has reconverged. Every symbol the source can declare is indexed
//! together with the boolean condition over preprocessor predicates under
//! which it would exist.
//!
//! ## How it works
//!
//! - **Conditions** are managed by [`cond::Conditions`], a BDD-backed
//!   algebra over interned predicate atoms. Equivalence and implication
//!   are exact, so branches are joined whenever they are entitled to be.
//! - **Branches** live in [`branch::BranchTree`], an arena of owned
//!   nodes. A conditional directive deactivates the current branch and
//!   forks an arm per `#if`/`#elif`/`#else`; `#endif` reactivates the
//!   arms and consolidates reconverged siblings under the disjunction of
//!   their conditions.
//! - **Symbols** land in [`symbol::SymbolIndex`] with condition-aware
//!   merge rules: structurally equal declarations widen one symbol's
//!   existence condition, conflicting ones are diagnosed.
//!
//! ## Basic usage
//!
//! ```
//! use cbranch::unit::Analyzer;
//! use cbranch::symbol::Query;
//!
//! let unit = Analyzer::new()
//!     .analyze_source("example.c", "#ifdef FAST\nint cache;\n#endif\n")
//!     .unwrap();
//!
//! let found = unit.index.find(&Query {
//!     identifier: Some("cache".into()),
//!     ..Default::default()
//! });
//! assert_eq!(unit.display_cond(found[0].existence), "defined(FAST)");
//! ```

pub mod branch;
pub mod cli;
pub mod cond;
pub mod diag;
pub mod expr;
pub mod lexer;
pub mod parser;
pub mod pending;
pub mod scope;
pub mod symbol;
pub mod token;
pub mod track;
pub mod unit;
