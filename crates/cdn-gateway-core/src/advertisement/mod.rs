//! Advertisement records and pointer resolution.

mod resolver;
mod store;
mod tags;

pub use resolver::{
    select_freshest, AdvertisementResolver, ResolveRequest, ResolvedObject, Selection,
    DEFAULT_LIMIT,
};
pub use store::{
    AdvertisementQuery, AdvertisementStore, HttpAdvertisementStore, MemoryAdvertisementStore,
};
pub use tags::{
    decode_hex_payload, expiry_tag, object_identifier_tag, owner_tag, parse_expiry_payload,
    pointer_tag, Advertisement, EXPIRY_TAG_PREFIX, OBJECT_IDENTIFIER_TAG_PREFIX,
    OWNER_TAG_PREFIX, POINTER_TAG_PREFIX,
};
