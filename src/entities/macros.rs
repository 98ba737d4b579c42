//! Macro for defining persisted entity types without boilerplate
//!
//! `document_entity!` generates the struct (identity, soft-delete and audit
//! fields plus the custom ones), the [`Entity`] implementation and a
//! constructor taking the custom fields in declaration order.
//!
//! [`Entity`]: crate::core::entity::Entity

/// Define a persisted entity type.
///
/// # Example
///
/// ```rust,ignore
/// document_entity!(Device, "devices", {
///     name: String,
///     reading: f64,
/// });
///
/// let device = Device::new("pump-4".to_string(), 7.5);
/// assert!(device.id.is_none());
/// assert!(!device.deleted);
/// ```
#[macro_export]
macro_rules! document_entity {
    ($name:ident, $collection:literal, { $( $(#[$fmeta:meta])* $field:ident : $ty:ty ),* $(,)? }) => {
        #[derive(Clone, Debug, ::serde::Serialize, ::serde::Deserialize)]
        pub struct $name {
            /// Store-assigned identifier (ObjectId hex); `None` before the
            /// first persist.
            #[serde(default, skip_serializing_if = "Option::is_none")]
            pub id: Option<String>,

            /// Soft-delete marker; excluded from default reads when set.
            #[serde(default)]
            pub deleted: bool,

            pub created_at: ::chrono::DateTime<::chrono::Utc>,

            pub updated_at: ::chrono::DateTime<::chrono::Utc>,

            #[serde(default, skip_serializing_if = "Option::is_none")]
            pub created_by: Option<String>,

            #[serde(default, skip_serializing_if = "Option::is_none")]
            pub updated_by: Option<String>,

            $( $(#[$fmeta])* pub $field : $ty, )*
        }

        impl $name {
            /// Create an unpersisted instance; identity and audit fields are
            /// filled in by the repository on persist.
            pub fn new($( $field : $ty ),*) -> Self {
                let now = ::chrono::Utc::now();
                Self {
                    id: None,
                    deleted: false,
                    created_at: now,
                    updated_at: now,
                    created_by: None,
                    updated_by: None,
                    $( $field, )*
                }
            }
        }

        impl $crate::core::entity::Entity for $name {
            fn collection_name() -> &'static str {
                $collection
            }

            fn id(&self) -> Option<&str> {
                self.id.as_deref()
            }

            fn set_id(&mut self, id: String) {
                self.id = Some(id);
            }

            fn deleted(&self) -> bool {
                self.deleted
            }

            fn set_deleted(&mut self, deleted: bool) {
                self.deleted = deleted;
            }

            fn created_at(&self) -> ::chrono::DateTime<::chrono::Utc> {
                self.created_at
            }

            fn set_created_at(&mut self, at: ::chrono::DateTime<::chrono::Utc>) {
                self.created_at = at;
            }

            fn updated_at(&self) -> ::chrono::DateTime<::chrono::Utc> {
                self.updated_at
            }

            fn set_updated_at(&mut self, at: ::chrono::DateTime<::chrono::Utc>) {
                self.updated_at = at;
            }

            fn set_created_by(&mut self, actor: Option<String>) {
                self.created_by = actor;
            }

            fn set_updated_by(&mut self, actor: Option<String>) {
                self.updated_by = actor;
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::core::entity::Entity;

    document_entity!(Gadget, "gadgets", {
        name: String,
        reading: f64,
    });

    #[test]
    fn generates_entity_impl() {
        let mut gadget = Gadget::new("pump-4".to_string(), 7.5);

        assert_eq!(Gadget::collection_name(), "gadgets");
        assert!(gadget.id().is_none());
        assert!(!gadget.deleted());
        assert!(gadget.is_active());

        gadget.set_id("abc".to_string());
        assert_eq!(gadget.id(), Some("abc"));

        gadget.set_deleted(true);
        assert!(!gadget.is_active());
    }

    #[test]
    fn serializes_without_unset_optionals() {
        let gadget = Gadget::new("pump-4".to_string(), 7.5);
        let json = serde_json::to_value(&gadget).unwrap();

        assert!(json.get("id").is_none());
        assert_eq!(json["deleted"], false);
        assert_eq!(json["name"], "pump-4");
    }
}
