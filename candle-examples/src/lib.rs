//! Demo programs for `candle-fit`; see the `examples/` directory.
