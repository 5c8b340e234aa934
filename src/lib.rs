//! Compact sequencer instructions and the per-shot compiler that turns steps, time
//! lanes and device configurations into them.

pub mod compiler;
pub mod device;
pub mod expression;
pub mod instruction;
pub mod lane;
pub mod shot;
pub mod timing;
