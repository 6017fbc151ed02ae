use std::fmt;

/// Crops tracked by the aggregation, keyed by their CDL classification code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Crop {
    Corn,
    Soy,
    SpringWheat,
    WinterWheat,
}

impl Crop {
    pub const ALL: [Crop; 4] = [Crop::Corn, Crop::Soy, Crop::SpringWheat, Crop::WinterWheat];

    pub fn code(self) -> i32 {
        match self {
            Crop::Corn => 1,
            Crop::Soy => 5,
            Crop::SpringWheat => 23,
            Crop::WinterWheat => 24,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Crop::Corn => "corn",
            Crop::Soy => "soy",
            Crop::SpringWheat => "spring_wheat",
            Crop::WinterWheat => "winter_wheat",
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Crop::ALL.into_iter().find(|c| c.code() == code)
    }

    /// Codes bound into the crop-area query's filter.
    pub fn codes() -> Vec<i32> {
        Crop::ALL.iter().map(|c| c.code()).collect()
    }
}

impl fmt::Display for Crop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
