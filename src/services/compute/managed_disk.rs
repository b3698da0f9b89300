//! Managed disks and their data source.

use super::managed_disk_update::ManagedDiskUpdate;
use super::models::{
    CreationData, Disk, DiskProperties, DiskSku, DiskUpdate, DiskUpdateProperties, Encryption,
    EncryptionSettingsCollection, EncryptionSettingsElement, KeyVaultKeyReference,
    KeyVaultSecretReference, ResourceRef,
};
use crate::arm::api_version::COMPUTE;
use crate::arm::client::{get_as, put_as};
use crate::arm::id::ManagedDiskId;
use crate::arm::{location, tags};
use crate::error::{ProviderError, Result};
use crate::resource::{
    first_block, ignore_not_found, BlockExt, Clients, Resource, ResourceData,
};
use crate::schema::{azure, Attribute, Block, DiffSuppress, NestedBlock, Schema};
use crate::types::Timeouts;
use crate::validation::Validator;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

const STORAGE_ACCOUNT_TYPES: &[&str] =
    &["Standard_LRS", "Premium_LRS", "StandardSSD_LRS", "UltraSSD_LRS"];
const CREATE_OPTIONS: &[&str] = &["Copy", "Empty", "FromImage", "Import", "Restore", "Upload"];
const OS_TYPES: &[&str] = &["Windows", "Linux"];
const ENCRYPTION_TYPES: &[&str] = &[
    "EncryptionAtRestWithPlatformKey",
    "EncryptionAtRestWithCustomerKey",
];
const HYPERV_GENERATIONS: &[&str] = &["V1", "V2"];

/// `azurerm_managed_disk`
pub struct ManagedDiskResource;

pub(crate) fn encryption_settings_block() -> NestedBlock {
    NestedBlock::list(
        Block::new()
            .with_attribute("enabled", Attribute::required_bool())
            .with_block(
                "disk_encryption_key",
                NestedBlock::list(
                    Block::new()
                        .with_attribute("secret_url", Attribute::required_string())
                        .with_attribute("source_vault_id", Attribute::required_string()),
                )
                .with_max_items(1),
            )
            .with_block(
                "key_encryption_key",
                NestedBlock::list(
                    Block::new()
                        .with_attribute("key_url", Attribute::required_string())
                        .with_attribute("source_vault_id", Attribute::required_string()),
                )
                .with_max_items(1),
            ),
    )
    .with_max_items(1)
}

fn expand_encryption_settings(block: &Map<String, Value>) -> EncryptionSettingsCollection {
    let disk_encryption_key = first_block(block.get("disk_encryption_key")).map(|k| {
        KeyVaultSecretReference {
            secret_url: k.str_field("secret_url").unwrap_or_default().to_string(),
            source_vault: ResourceRef::new(k.str_field("source_vault_id").unwrap_or_default()),
        }
    });
    let key_encryption_key = first_block(block.get("key_encryption_key")).map(|k| {
        KeyVaultKeyReference {
            key_url: k.str_field("key_url").unwrap_or_default().to_string(),
            source_vault: ResourceRef::new(k.str_field("source_vault_id").unwrap_or_default()),
        }
    });
    EncryptionSettingsCollection {
        enabled: block.bool_field("enabled"),
        encryption_settings: vec![EncryptionSettingsElement {
            disk_encryption_key,
            key_encryption_key,
        }],
    }
}

fn flatten_encryption_settings(input: Option<&EncryptionSettingsCollection>) -> Option<Value> {
    let input = input?;
    let first = input.encryption_settings.first();
    let disk_key: Vec<Value> = first
        .and_then(|s| s.disk_encryption_key.as_ref())
        .map(|k| json!({"secret_url": k.secret_url, "source_vault_id": k.source_vault.id}))
        .into_iter()
        .collect();
    let key_key: Vec<Value> = first
        .and_then(|s| s.key_encryption_key.as_ref())
        .map(|k| json!({"key_url": k.key_url, "source_vault_id": k.source_vault.id}))
        .into_iter()
        .collect();
    Some(json!({
        "enabled": input.enabled,
        "disk_encryption_key": disk_key,
        "key_encryption_key": key_key,
    }))
}

fn expand_encryption(block: Option<&Map<String, Value>>) -> Option<Encryption> {
    block.map(|b| Encryption {
        disk_encryption_set_id: b.str_field("disk_encryption_set_id").map(str::to_string),
        kind: b.str_field("type").unwrap_or_default().to_string(),
    })
}

impl ManagedDiskResource {
    fn creation_data(&self, d: &ResourceData) -> Result<CreationData> {
        let create_option = d.required_str("create_option")?.to_string();
        let mut data = CreationData {
            create_option: create_option.clone(),
            ..Default::default()
        };
        let required = |key: &str| {
            d.get_string(key).ok_or_else(|| {
                ProviderError::Validation(format!(
                    "`{}` must be specified when `create_option` is `{}`",
                    key, create_option
                ))
            })
        };

        match create_option.to_ascii_lowercase().as_str() {
            "import" => {
                data.source_uri = Some(required("source_uri")?);
                data.storage_account_id = d.get_string("storage_account_id");
            },
            "copy" | "restore" => data.source_resource_id = Some(required("source_resource_id")?),
            "fromimage" => {
                data.image_reference = Some(ResourceRef::new(required("image_reference_id")?));
            },
            "upload" => {
                let size = d.get_i64("upload_size_bytes").filter(|s| *s > 0).ok_or_else(|| {
                    ProviderError::Validation(format!(
                        "`upload_size_bytes` must be specified when `create_option` is `{}`",
                        create_option
                    ))
                })?;
                data.upload_size_bytes = Some(size);
            },
            _ => {},
        }
        Ok(data)
    }

    /// IOPS and throughput limits can only be set on Ultra SSDs.
    fn performance(&self, d: &ResourceData, storage_account_type: &str) -> Result<(Option<i64>, Option<i64>)> {
        let iops = d.get_ok("disk_iops_read_write").and_then(Value::as_i64);
        let mbps = d.get_ok("disk_mbps_read_write").and_then(Value::as_i64);
        let changed = d.has_change("disk_iops_read_write") || d.has_change("disk_mbps_read_write");
        if storage_account_type.eq_ignore_ascii_case("UltraSSD_LRS") {
            return Ok((
                iops.filter(|_| d.has_change("disk_iops_read_write")),
                mbps.filter(|_| d.has_change("disk_mbps_read_write")),
            ));
        }
        if changed && (iops.is_some() || mbps.is_some()) {
            return Err(ProviderError::Validation(
                "`disk_iops_read_write` and `disk_mbps_read_write` are only available for UltraSSD disks"
                    .to_string(),
            ));
        }
        Ok((None, None))
    }
}

#[async_trait]
impl Resource for ManagedDiskResource {
    fn type_name(&self) -> &'static str {
        "azurerm_managed_disk"
    }

    fn timeouts(&self) -> Timeouts {
        Timeouts::minutes(30, 5, 30, 30)
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("name", Attribute::required_string().with_force_new())
            .with_attribute("location", azure::location())
            .with_attribute("resource_group_name", azure::resource_group_name())
            .with_attribute("zones", azure::single_zone())
            .with_attribute(
                "storage_account_type",
                Attribute::required_string()
                    .with_validator(Validator::one_of_ignore_case(STORAGE_ACCOUNT_TYPES))
                    .with_diff_suppress(DiffSuppress::CaseInsensitive),
            )
            .with_attribute(
                "create_option",
                Attribute::required_string()
                    .with_force_new()
                    .with_validator(Validator::one_of_ignore_case(CREATE_OPTIONS)),
            )
            .with_attribute(
                "source_uri",
                Attribute::optional_computed_string().with_force_new(),
            )
            .with_attribute(
                "source_resource_id",
                Attribute::optional_string().with_force_new(),
            )
            .with_attribute(
                "image_reference_id",
                Attribute::optional_string().with_force_new(),
            )
            .with_attribute(
                "storage_account_id",
                Attribute::optional_string().with_force_new(),
            )
            .with_attribute(
                "upload_size_bytes",
                Attribute::optional_int64().with_force_new(),
            )
            .with_attribute(
                "os_type",
                Attribute::optional_string().with_validator(Validator::one_of_ignore_case(OS_TYPES)),
            )
            .with_attribute(
                "disk_size_gb",
                Attribute::optional_int64()
                    .computed()
                    .with_validator(Validator::IntBetween(0, 32767)),
            )
            .with_attribute("disk_iops_read_write", Attribute::optional_int64().computed())
            .with_attribute("disk_mbps_read_write", Attribute::optional_int64().computed())
            .with_block("encryption_settings", encryption_settings_block())
            .with_block(
                "encryption",
                NestedBlock::list(
                    Block::new()
                        .with_attribute(
                            "type",
                            Attribute::required_string()
                                .with_validator(Validator::one_of(ENCRYPTION_TYPES)),
                        )
                        .with_attribute("disk_encryption_set_id", Attribute::optional_string()),
                )
                .with_max_items(1),
            )
            .with_attribute(
                "hyperv_generation",
                Attribute::optional_string()
                    .with_validator(Validator::one_of(HYPERV_GENERATIONS))
                    .with_default(json!("V1")),
            )
            .with_attribute("disk_size_bytes", Attribute::computed_int64())
            .with_attribute("disk_state", Attribute::computed_string())
            .with_attribute("managed_by", Attribute::computed_string())
            .with_attribute("time_created", Attribute::computed_string())
            .with_attribute("unique_id", Attribute::computed_string())
            .with_attribute("tags", azure::tags())
    }

    async fn create(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        info!("preparing arguments for managed disk creation");
        let name = d.required_str("name")?.to_string();
        let resource_group = d.required_str("resource_group_name")?.to_string();
        let id = ManagedDiskId::new(&clients.subscription_id, &resource_group, &name);

        clients
            .check_not_exists(self.type_name(), &id.id(), COMPUTE)
            .await?;

        let storage_account_type = d.required_str("storage_account_type")?.to_string();
        let (disk_iops_read_write, disk_mbps_read_write) =
            self.performance(d, &storage_account_type)?;

        let disk = Disk {
            name: Some(name),
            location: d.get_str("location").map(location::normalize),
            sku: Some(DiskSku {
                name: storage_account_type,
            }),
            zones: d.get_string_list("zones"),
            tags: tags::expand(d.get("tags")),
            properties: DiskProperties {
                os_type: d.get_string("os_type"),
                hyper_v_generation: d.get_string("hyperv_generation"),
                creation_data: Some(self.creation_data(d)?),
                disk_size_gb: d.get_ok("disk_size_gb").and_then(Value::as_i64),
                disk_iops_read_write,
                disk_mbps_read_write,
                encryption_settings_collection: d
                    .get_block("encryption_settings")
                    .map(expand_encryption_settings),
                encryption: expand_encryption(d.get_block("encryption")),
                ..Default::default()
            },
            ..Default::default()
        };

        let created: Disk = put_as(clients.arm(), &id.id(), COMPUTE, &disk).await?;
        let resource_id = created.id.ok_or_else(|| {
            ProviderError::FailedPrecondition(format!("cannot read {} ID", id))
        })?;
        d.set_id(resource_id);
        self.read(clients, d).await
    }

    async fn read(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = ManagedDiskId::parse(d.id())?;
        let disk: Disk = match get_as(clients.arm(), &id.id(), COMPUTE).await {
            Ok(disk) => disk,
            Err(e) if e.is_not_found() => {
                info!(%id, "disk does not exist; removing from state");
                d.clear_id();
                return Ok(());
            },
            Err(e) => return Err(e),
        };

        d.set("name", disk.name.clone().unwrap_or_else(|| id.name.clone()));
        d.set("resource_group_name", id.resource_group.as_str());
        d.set("zones", disk.zones.clone());
        d.set("location", disk.location.as_deref().map(location::normalize));
        d.set("storage_account_type", disk.sku.as_ref().map(|s| s.name.clone()));
        d.set("managed_by", disk.managed_by.clone());

        let props = &disk.properties;
        if let Some(creation) = &props.creation_data {
            d.set("create_option", creation.create_option.as_str());
            d.set("source_resource_id", creation.source_resource_id.clone());
            d.set("source_uri", creation.source_uri.clone());
            d.set("storage_account_id", creation.storage_account_id.clone());
            if let Some(image) = &creation.image_reference {
                d.set("image_reference_id", image.id.clone());
            }
            if let Some(size) = creation.upload_size_bytes {
                d.set("upload_size_bytes", size);
            }
        }
        d.set("disk_size_gb", props.disk_size_gb);
        d.set("os_type", props.os_type.clone());
        d.set("disk_iops_read_write", props.disk_iops_read_write);
        d.set("disk_mbps_read_write", props.disk_mbps_read_write);
        d.set("disk_size_bytes", props.disk_size_bytes);
        d.set("disk_state", props.disk_state.clone());
        d.set_block(
            "encryption",
            props.encryption.as_ref().map(|e| {
                json!({"type": e.kind, "disk_encryption_set_id": e.disk_encryption_set_id})
            }),
        );
        d.set_block(
            "encryption_settings",
            flatten_encryption_settings(props.encryption_settings_collection.as_ref()),
        );
        d.set("hyperv_generation", props.hyper_v_generation.clone());
        d.set("time_created", props.time_created.clone());
        d.set("unique_id", props.unique_id.clone());
        d.set("tags", tags::flatten(serde_json::to_value(&disk.tags).ok().as_ref()));
        Ok(())
    }

    async fn update(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = ManagedDiskId::parse(d.id())?;
        let storage_account_type = d.required_str("storage_account_type")?.to_string();
        let mut shut_down = false;
        let mut update = DiskUpdate::default();

        if d.has_change("tags") {
            update.tags = Some(tags::expand(d.get("tags")));
        }
        if d.has_change("storage_account_type") {
            shut_down = true;
            update.sku = Some(DiskSku {
                name: storage_account_type.clone(),
            });
        }
        if d.has_change("os_type") {
            update.properties.os_type = d.get_string("os_type");
        }
        if d.has_change("disk_size_gb") {
            let old = d.prior("disk_size_gb").and_then(Value::as_i64).unwrap_or(0);
            let new = d.get_i64("disk_size_gb").unwrap_or(0);
            if new < old {
                return Err(ProviderError::Validation(format!(
                    "managed disks can only be expanded: {} GB is smaller than the current {} GB",
                    new, old
                )));
            }
            shut_down = true;
            update.properties.disk_size_gb = Some(new);
        }
        let (iops, mbps) = self.performance(d, &storage_account_type)?;
        update.properties = DiskUpdateProperties {
            disk_iops_read_write: iops,
            disk_mbps_read_write: mbps,
            ..update.properties
        };
        if d.has_change("encryption_settings") {
            update.properties.encryption_settings_collection = Some(
                d.get_block("encryption_settings")
                    .map(expand_encryption_settings)
                    .unwrap_or_default(),
            );
        }
        if d.has_change("encryption") {
            update.properties.encryption = expand_encryption(d.get_block("encryption"));
        }

        if update.is_empty() {
            debug!(%id, "nothing to update");
            return self.read(clients, d).await;
        }

        let managed_by = d.get_string("managed_by");
        let _guard = clients.locks.by_id(&id.id()).await;
        ManagedDiskUpdate {
            arm: clients.arm(),
            locks: &clients.locks,
            disk: &id,
            managed_by: managed_by.as_deref(),
            shut_down,
        }
        .perform(&update)
        .await?;

        self.read(clients, d).await
    }

    async fn delete(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = ManagedDiskId::parse(d.id())?;
        info!(%id, "deleting managed disk");
        ignore_not_found(clients.arm().delete(&id.id(), COMPUTE).await)
    }

    fn validate_import_id(&self, id: &str) -> Result<()> {
        ManagedDiskId::parse(id).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeResourceManager;
    use std::sync::Arc;

    const ID: &str = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/disks/disk1";
    const VM: &str = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm1";

    fn config() -> Value {
        json!({
            "name": "disk1",
            "resource_group_name": "rg",
            "location": "West Europe",
            "storage_account_type": "Standard_LRS",
            "create_option": "Empty",
            "disk_size_gb": 10,
            "hyperv_generation": "V1",
            "zones": ["1"],
            "tags": {"env": "dev"}
        })
    }

    fn clients(fake: &Arc<FakeResourceManager>) -> Clients {
        Clients::new(fake.clone(), "sub")
    }

    #[tokio::test]
    async fn test_create_empty_disk() {
        let fake = Arc::new(FakeResourceManager::new());
        let mut d = ResourceData::for_create(config());
        ManagedDiskResource.create(&clients(&fake), &mut d).await.unwrap();

        let stored = fake.stored(ID).unwrap();
        assert_eq!(stored["sku"]["name"], "Standard_LRS");
        assert_eq!(stored["properties"]["creationData"]["createOption"], "Empty");
        assert_eq!(stored["properties"]["diskSizeGB"], 10);
        assert!(stored["properties"].get("diskIOPSReadWrite").is_none());
        assert_eq!(d.id(), ID);
        assert_eq!(d.get_str("location"), Some("westeurope"));
        assert_eq!(d.get_i64("disk_size_gb"), Some(10));
        assert_eq!(d.get("encryption"), Some(&json!([])));
    }

    #[tokio::test]
    async fn test_create_option_requirements() {
        let fake = Arc::new(FakeResourceManager::new());
        for (option, missing) in [
            ("Import", "source_uri"),
            ("Copy", "source_resource_id"),
            ("Restore", "source_resource_id"),
            ("FromImage", "image_reference_id"),
            ("Upload", "upload_size_bytes"),
        ] {
            let mut cfg = config();
            cfg["create_option"] = json!(option);
            let mut d = ResourceData::for_create(cfg);
            let err = ManagedDiskResource
                .create(&clients(&fake), &mut d)
                .await
                .unwrap_err();
            assert!(err.to_string().contains(missing), "{}: {}", option, err);
        }
        assert!(fake.calls_to("PUT").is_empty());
    }

    #[tokio::test]
    async fn test_iops_only_for_ultra_ssd() {
        let fake = Arc::new(FakeResourceManager::new());
        let mut cfg = config();
        cfg["disk_iops_read_write"] = json!(2000);
        let mut d = ResourceData::for_create(cfg.clone());
        let err = ManagedDiskResource
            .create(&clients(&fake), &mut d)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));

        cfg["storage_account_type"] = json!("UltraSSD_LRS");
        let mut d = ResourceData::for_create(cfg);
        ManagedDiskResource.create(&clients(&fake), &mut d).await.unwrap();
        assert_eq!(fake.stored(ID).unwrap()["properties"]["diskIOPSReadWrite"], 2000);
    }

    #[tokio::test]
    async fn test_encryption_settings_round_trip_through_state() {
        let fake = Arc::new(FakeResourceManager::new());
        let mut cfg = config();
        cfg["encryption_settings"] = json!([{
            "enabled": true,
            "disk_encryption_key": [{"secret_url": "https://kv/secrets/s", "source_vault_id": "vault"}]
        }]);
        let mut d = ResourceData::for_create(cfg);
        ManagedDiskResource.create(&clients(&fake), &mut d).await.unwrap();

        let stored = fake.stored(ID).unwrap();
        assert_eq!(
            stored["properties"]["encryptionSettingsCollection"]["encryptionSettings"][0]
                ["diskEncryptionKey"]["secretUrl"],
            "https://kv/secrets/s"
        );
        let block = d.get_block("encryption_settings").unwrap();
        assert!(block.bool_field("enabled"));
        assert_eq!(
            first_block(block.get("disk_encryption_key")).and_then(|k| k.str_field("source_vault_id")),
            Some("vault")
        );
    }

    #[tokio::test]
    async fn test_resize_attached_disk_cycles_vm() {
        let fake = Arc::new(FakeResourceManager::new());
        fake.seed(
            ID,
            json!({
                "id": ID,
                "name": "disk1",
                "managedBy": VM,
                "sku": {"name": "Standard_LRS"},
                "properties": {"diskSizeGB": 10, "creationData": {"createOption": "Empty"}}
            }),
        );
        fake.seed(
            &format!("{}/instanceView", VM),
            json!({"statuses": [{"code": "PowerState/running"}]}),
        );

        let mut prior = config();
        prior["id"] = json!(ID);
        prior["managed_by"] = json!(VM);
        let mut planned = prior.clone();
        planned["disk_size_gb"] = json!(20);

        let mut d = ResourceData::for_update(prior, planned);
        ManagedDiskResource.update(&clients(&fake), &mut d).await.unwrap();

        let posts = fake.calls_to("POST");
        assert_eq!(posts.len(), 3);
        assert!(posts[0].ends_with("/powerOff?skipShutdown=false"));
        assert!(posts[1].ends_with("/deallocate"));
        assert!(posts[2].ends_with("/start"));
        assert_eq!(d.get_i64("disk_size_gb"), Some(20));
    }

    #[tokio::test]
    async fn test_tag_change_does_not_touch_vm() {
        let fake = Arc::new(FakeResourceManager::new());
        fake.seed(ID, json!({"id": ID, "managedBy": VM, "properties": {}}));

        let mut prior = config();
        prior["id"] = json!(ID);
        prior["managed_by"] = json!(VM);
        let mut planned = prior.clone();
        planned["tags"] = json!({"env": "prod"});

        let mut d = ResourceData::for_update(prior, planned);
        ManagedDiskResource.update(&clients(&fake), &mut d).await.unwrap();

        assert!(fake.calls_to("POST").is_empty());
        assert_eq!(fake.calls_to("PATCH"), vec![ID.to_string()]);
        assert_eq!(d.get("tags"), Some(&json!({"env": "prod"})));
    }

    #[tokio::test]
    async fn test_shrinking_is_rejected() {
        let fake = Arc::new(FakeResourceManager::new());
        let mut prior = config();
        prior["id"] = json!(ID);
        let mut planned = prior.clone();
        planned["disk_size_gb"] = json!(5);
        let mut d = ResourceData::for_update(prior, planned);
        tokio_test::assert_err!(ManagedDiskResource.update(&clients(&fake), &mut d).await);
    }
}
