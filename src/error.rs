// Copyright (c) 2024 The Spline-CC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error type for congestion control operations.

use std::fmt;

/// An error that can occur while configuring a congestion controller.
///
/// The numerical core itself is infallible: every domain condition (invalid
/// samples, overflow, zero divisors) is recovered locally and shows up only
/// as clamped window and pacing outputs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The provided configuration is invalid, e.g. an unknown congestion
    /// control algorithm name.
    InvalidConfig(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_format() {
        let e = Error::InvalidConfig("unknown".into());
        assert_eq!(format!("{}", e), "InvalidConfig(\"unknown\")");
        assert!(std::error::Error::source(&e).is_none());
    }
}
