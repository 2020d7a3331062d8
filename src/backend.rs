// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Shared code for codec backends.
//!
//! A backend is a provider of hardware-accelerated decoding. This module holds the data formats
//! a backend exchanges with the hardware, independently of the decoder driving it.

pub mod dxva;
