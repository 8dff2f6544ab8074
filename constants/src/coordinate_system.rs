/// Scene unit conversion for survey data (LAS metres to scene centimetres)

/// Scale applied to incoming survey coordinates
pub const SURVEY_TO_SCENE_SCALE: f64 = 100.0;

/// Convert survey coordinates into scene space relative to an origin.
/// Both the source data and the scene are Z-up, so only translation and scale apply.
pub fn transform_coordinates(x: f64, y: f64, z: f64, origin: [f64; 3]) -> (f64, f64, f64) {
    (
        (x - origin[0]) * SURVEY_TO_SCENE_SCALE,
        (y - origin[1]) * SURVEY_TO_SCENE_SCALE,
        (z - origin[2]) * SURVEY_TO_SCENE_SCALE,
    )
}
