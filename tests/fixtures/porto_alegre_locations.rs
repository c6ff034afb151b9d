//! Porto Alegre locations used by the demo data set.

use home_scorer::model::Coordinate;

/// A named location with coordinates.
#[derive(Debug, Clone, Copy)]
pub struct Location {
    pub name: &'static str,
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub const fn new(name: &'static str, lat: f64, lon: f64) -> Self {
        Self { name, lat, lon }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lon)
    }
}

pub const DOWNTOWN_OFFICE: Location = Location::new("Downtown Office", -30.0346, -51.2177);
pub const SHOPPING_CENTER: Location = Location::new("Shopping Center", -30.0277, -51.2287);

pub const NORTH_LOCATION: Location = Location::new("North Location", -30.0200, -51.2000);
pub const CENTRAL_LOCATION: Location = Location::new("Central Location", -30.0346, -51.2177);
pub const SOUTH_LOCATION: Location = Location::new("South Location", -30.0500, -51.2200);

pub const HOMES: &[Location] = &[NORTH_LOCATION, CENTRAL_LOCATION, SOUTH_LOCATION];

/// `home_options.json` as the demo ships it.
pub const HOMES_JSON: &str = r#"[
    {"name": "North Location", "coords": [-30.0200, -51.2000]},
    {"name": "Central Location", "coords": [-30.0346, -51.2177]},
    {"name": "South Location", "coords": [-30.0500, -51.2200]}
]"#;

/// `destinations.json` as the demo ships it.
pub const DESTINATIONS_JSON: &str = r#"[
    {
        "name": "Downtown Office",
        "weight": 5.0,
        "departure_time_to": "08:00",
        "departure_time_from": "17:00",
        "day_of_week": "Monday",
        "transport_mode": "auto",
        "group": "work",
        "coords": [-30.0346, -51.2177]
    },
    {
        "name": "Shopping Center",
        "weight": 2.0,
        "departure_time_to": "10:00",
        "departure_time_from": "12:00",
        "day_of_week": "Saturday",
        "transport_mode": "auto",
        "group": "shopping",
        "coords": [-30.0277, -51.2287]
    }
]"#;
