use serde::{Deserialize, Serialize};

/// The closed set of motorcycle models the classifier can name.
pub const BIKE_MODELS: [&str; 10] = [
    "Honda CBR600RR",
    "Yamaha YZF-R1",
    "Kawasaki Ninja ZX-10R",
    "Suzuki GSX-R1000",
    "Ducati Panigale V4",
    "BMW S1000RR",
    "Aprilia RSV4",
    "KTM RC 390",
    "Triumph Daytona 675",
    "MV Agusta F3",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub model: String,
    pub confidence: f64,
}

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub success: bool,
    pub filename: String,
    pub predictions: Vec<Prediction>,
    pub top_prediction: Prediction,
}
