// SPDX-License-Identifier: MIT

pub mod machine;
pub mod updater;
