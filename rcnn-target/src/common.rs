pub use anyhow::{ensure, format_err};
pub use approx::AbsDiffEq;
pub use bbox::{Rect, RectFloat, RectNum, TLBR};
pub use itertools::{izip, Itertools};
pub use label::{GroundTruth, InstanceMask, Label, BACKGROUND_CLASS};
pub use ndarray::{Array2, ArrayView2};
pub use noisy_float::prelude::*;
pub use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
pub use rayon::prelude::*;
pub use serde::{
    de::Error as _, Deserialize, Deserializer, Serialize, Serializer,
};
pub use std::{
    convert::TryFrom,
    fmt::{self, Display, Formatter},
    num::NonZeroUsize,
    path::Path,
};
pub use tracing::{debug, trace, trace_span, warn};
