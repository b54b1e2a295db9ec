//! Unit canonicalization
//!
//! Applied only when `attributes.unit_of_measurement` is present. Canonical
//! names map to themselves, which keeps normalization idempotent.

/// Alias → canonical unit table.
const UNIT_ALIASES: &[(&str, &str)] = &[
    ("°C", "celsius"),
    ("℃", "celsius"),
    ("°F", "fahrenheit"),
    ("℉", "fahrenheit"),
    ("K", "kelvin"),
    ("hPa", "hectopascal"),
    ("mbar", "millibar"),
    ("kPa", "kilopascal"),
    ("Pa", "pascal"),
    ("inHg", "inch_of_mercury"),
    ("mmHg", "millimeter_of_mercury"),
    ("%", "percent"),
    ("W", "watt"),
    ("kW", "kilowatt"),
    ("Wh", "watt_hour"),
    ("kWh", "kilowatt_hour"),
    ("A", "ampere"),
    ("V", "volt"),
    ("lx", "lux"),
    ("lm", "lumen"),
    ("ppm", "parts_per_million"),
    ("ppb", "parts_per_billion"),
    ("µg/m³", "micrograms_per_cubic_meter"),
    ("m/s", "meters_per_second"),
    ("km/h", "kilometers_per_hour"),
    ("mph", "miles_per_hour"),
    ("mm", "millimeter"),
    ("cm", "centimeter"),
    ("in", "inch"),
    ("s", "second"),
    ("min", "minute"),
    ("h", "hour"),
];

/// Canonical form of a unit string. Unknown units pass through unchanged.
pub fn canonicalize(unit: &str) -> String {
    for (alias, canonical) in UNIT_ALIASES {
        if *alias == unit {
            return (*canonical).to_string();
        }
    }
    unit.to_string()
}
