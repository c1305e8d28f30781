// Log through `defmt` on targets that use it, through `log` everywhere else.

#[cfg(feature = "defmt")]
#[allow(unused_imports)]
pub(crate) use defmt::{debug, info, trace, warn};

#[cfg(not(feature = "defmt"))]
#[allow(unused_imports)]
pub(crate) use log::{debug, info, trace, warn};
