pub const SELECT_TRIP: &str = r#"
SELECT trip_id, starting_lon, starting_lat, destination_lon, destination_lat,
       current_lon, current_lat, route_polyline, available_seats,
       is_ride_requests_allowed, trip_status, distance_meters, duration,
       created_at, updated_at
FROM trips WHERE trip_id = $1;
"#;

pub const INSERT_TRIP: &str = r#"
INSERT INTO trips (
    trip_id, starting_lon, starting_lat, destination_lon, destination_lat,
    route_polyline, available_seats, is_ride_requests_allowed, trip_status,
    distance_meters, duration, created_at, updated_at
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW(), NOW());
"#;

pub const SELECT_CANDIDATE_TRIPS: &str = r#"
SELECT trip_id, starting_lon, starting_lat, destination_lon, destination_lat,
       current_lon, current_lat, route_polyline, available_seats,
       is_ride_requests_allowed, trip_status, distance_meters, duration,
       created_at, updated_at
FROM trips
WHERE trip_status = ANY($1)
  AND created_at >= $2
  AND route_polyline IS NOT NULL;
"#;

pub const INSERT_LOCATION_HISTORY: &str = r#"
INSERT INTO trip_location_history (trip_id, lat, lon, timestamp)
VALUES ($1, $2, $3, $4);
"#;

pub const UPDATE_TRIP_CURRENT_LOCATION: &str = r#"
UPDATE trips
SET current_lon = $2,
    current_lat = $3,
    updated_at = NOW()
WHERE trip_id = $1;
"#;

pub const SELECT_LOCATION_HISTORY: &str = r#"
SELECT trip_id, lat, lon, timestamp
FROM trip_location_history
WHERE trip_id = $1
ORDER BY timestamp DESC
LIMIT $2;
"#;

pub const SELECT_ACTIVE_SETTINGS: &str = r#"
SELECT radius_meters, speed_kmh, speed_mps, is_active
FROM trip_settings_config
WHERE is_active = TRUE
LIMIT 1;
"#;

pub const INSERT_SETTINGS: &str = r#"
INSERT INTO trip_settings_config (radius_meters, speed_kmh, speed_mps, is_active)
VALUES ($1, $2, $3, TRUE);
"#;

pub const ENSURE_SUBSCRIPTION_ROW: &str = r#"
INSERT INTO client_subscribed_trips (session_id, subscribed_to)
VALUES ($1, '{}')
ON CONFLICT (session_id) DO NOTHING;
"#;

pub const SELECT_SUBSCRIPTION: &str = r#"
SELECT session_id, subscribed_to
FROM client_subscribed_trips
WHERE session_id = $1;
"#;

pub const ADD_SUBSCRIPTION: &str = r#"
UPDATE client_subscribed_trips
SET subscribed_to = array_append(subscribed_to, $2)
WHERE session_id = $1
  AND NOT ($2 = ANY(subscribed_to));
"#;

pub const REMOVE_SUBSCRIPTION: &str = r#"
UPDATE client_subscribed_trips
SET subscribed_to = array_remove(subscribed_to, $2)
WHERE session_id = $1
  AND $2 = ANY(subscribed_to);
"#;
