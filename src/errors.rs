//! Core error kinds for the fracture-propagation engine.
//!
//! One `error_chain!` block per concern: domain error kinds listed under
//! `errors`, and `foreign_links` reserved for errors that cross a library
//! boundary (used by `config`, not here).

error_chain::error_chain! {
    errors {
        /// A fourth-order compliance (or its partial inverse) has a
        /// vanishing determinant on the reduced sub-matrix.
        SingularCompliance(detail: String) {
            description("compliance tensor is singular")
            display("compliance tensor is singular: {}", detail)
        }
        /// The inverse bilinear (u,v) mapping failed because both roots of
        /// the quadratic are complex (self-intersecting base quad).
        SingularGeometry(detail: String) {
            description("gridblock geometry is degenerate")
            display("gridblock geometry is degenerate: {}", detail)
        }
        /// A propagation distance exceeded the corrupted-tape threshold of
        /// 1e50.
        PropagationOverflow(distance: f64) {
            description("fracture propagation distance overflowed")
            display("fracture propagation distance {:e} exceeds the corrupted-tape threshold", distance)
        }
        /// The tape cursor for a gridblock/dipset was asked for a timestep
        /// beyond what has been recorded; fatal/programmer error.
        InvariantViolation(detail: String) {
            description("tape invariant violated")
            display("tape invariant violated: {}", detail)
        }
    }
}
