use uuid::Uuid;

/// Row ids are UUIDv7 so lexical order tracks creation order.
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

pub fn new_uuid_v4() -> String {
    Uuid::new_v4().to_string()
}
