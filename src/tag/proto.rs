//! Messages of the `tag` package.
//!
//! Written out by hand in the shape `prost-build` generates, with serde
//! derives for the JSON gateway and the downstream API.

use serde::{Deserialize, Serialize};

/// Logical name the service registers under.
pub const SERVICE_NAME: &str = "tag-service";

pub const GET_TAG_LIST: &str = "/tag.TagService/GetTagList";

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct GetTagListRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(uint32, tag = "2")]
    pub state: u32,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Tag {
    #[prost(int64, tag = "1")]
    pub id: i64,
    #[prost(string, tag = "2")]
    pub name: ::prost::alloc::string::String,
    #[prost(uint32, tag = "3")]
    pub state: u32,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct Pager {
    #[prost(int64, tag = "1")]
    pub page: i64,
    #[prost(int64, tag = "2")]
    pub page_size: i64,
    #[prost(int64, tag = "3")]
    pub total_rows: i64,
}

#[derive(Clone, PartialEq, ::prost::Message, Serialize, Deserialize)]
#[serde(default)]
pub struct GetTagListReply {
    /// The downstream API calls this field `list`.
    #[prost(message, repeated, tag = "1")]
    #[serde(alias = "list")]
    pub tags: ::prost::alloc::vec::Vec<Tag>,
    #[prost(message, optional, tag = "2")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pager: ::core::option::Option<Pager>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn reply_reads_downstream_json() {
        let body = r#"{"list":[{"id":1,"name":"Go","state":1,"created_by":"x"}],"pager":{"page":1,"page_size":10,"total_rows":1}}"#;
        let reply: GetTagListReply = serde_json::from_str(body).unwrap();
        assert_eq!(reply.tags.len(), 1);
        assert_eq!(reply.tags[0].name, "Go");
        assert_eq!(reply.pager.as_ref().map(|p| p.total_rows), Some(1));
    }

    #[test]
    fn request_fields_are_optional() {
        let req: GetTagListRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req, GetTagListRequest::default());
    }

    #[test]
    fn wire_encoding_matches_field_tags() {
        let req = GetTagListRequest {
            name: "Go".into(),
            state: 1,
        };
        // field 1 (string) then field 2 (varint)
        assert_eq!(req.encode_to_vec(), vec![0x0a, 2, b'G', b'o', 0x10, 1]);
    }
}
