// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

mod stopwatch;

pub(crate) use stopwatch::*;
