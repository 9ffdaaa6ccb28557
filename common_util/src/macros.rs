// Copyright 2022 RangeStore Project Authors. Licensed under Apache-2.0.

//! Contains all needed macros

/// Define the result type with given error type
#[macro_export]
macro_rules! define_result {
    ($t:ty) => {
        pub type Result<T> = std::result::Result<T, $t>;
    };
}
