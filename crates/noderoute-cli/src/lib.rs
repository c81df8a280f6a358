// Copyright 2025 noderoute Authors
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

//! # noderoute CLI
//!
//! Command-line front end for the noderoute router.
//!
//! ## Key Commands
//!
//! - `noderoute validate`: load a cluster config, validate it and print a summary
//! - `noderoute simulate`: drive a simulated workload through a real router
//!   built from a cluster config and print the resulting metrics

pub mod sim;
