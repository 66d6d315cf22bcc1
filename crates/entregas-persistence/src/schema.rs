// Esquema Diesel del almacén local (SQLite).
// Tablas: outbox_items, delivery_records, artifact_records, photo_cache
use diesel::allow_tables_to_appear_in_same_query;
diesel::table! {
    outbox_items (seq) {
        seq -> BigInt,
        id -> Text,
        kind -> Text,
        payload -> Text,
        retries -> Integer,
        last_attempt_ts -> Nullable<BigInt>,
        last_error -> Nullable<Text>,
        created_at_ts -> BigInt,
    }
}
diesel::table! {
    delivery_records (stop_key) {
        stop_key -> Text,
        trip_id -> Text,
        stop_number -> Integer,
        client_id -> Text,
        client_name -> Text,
        destination_detail -> Text,
        state -> Text,
        receipt_numbers -> Text,
        receiver_name -> Nullable<Text>,
        artifact_urls -> Text,
        trip_date -> Nullable<Text>,
        updated_at_ts -> BigInt,
        synced -> Bool,
    }
}
diesel::table! {
    artifact_records (id) {
        id -> Text,
        stop_key -> Text,
        filename -> Text,
        uploaded -> Bool,
        remote_id -> Nullable<Text>,
        remote_link -> Nullable<Text>,
        created_at_ts -> BigInt,
    }
}
diesel::table! {
    photo_cache (id) {
        id -> Text,
        stop_key -> Text,
        content -> Binary,
        processed -> Bool,
        created_at_ts -> BigInt,
    }
}
allow_tables_to_appear_in_same_query!(outbox_items, delivery_records, artifact_records, photo_cache);
