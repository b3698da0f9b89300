//! The legacy `azurerm_virtual_machine` resource.
//!
//! Create and update both PUT the full model under the VM's named lock, the
//! same lock the managed disk sequencer takes before stopping a VM.

use super::managed_disk_update::VM_LOCK_TYPE;
use super::models::{
    AdditionalCapabilities, AdditionalUnattendContent, BillingProfile, BootDiagnostics, DataDisk,
    DiagnosticsProfile, DiffDiskSettings, Disk, DiskEncryptionSettings, HardwareProfile,
    ImageReference, KeyVaultKeyReference, KeyVaultSecretReference, LinuxConfiguration,
    ManagedDiskParameters, NetworkInterfaceReference, NetworkInterfaceReferenceProperties,
    NetworkProfile, OsDisk, OsProfile, Plan, ResourceRef, SshConfiguration, SshPublicKey,
    StorageProfile, VaultCertificate, VaultSecretGroup, VirtualHardDisk, VirtualMachine,
    VirtualMachineIdentity, VirtualMachineProperties, WinRmConfiguration, WinRmListener,
    WindowsConfiguration,
};
use crate::arm::api_version::COMPUTE;
use crate::arm::client::{get_as, put_as};
use crate::arm::id::{ManagedDiskId, VirtualMachineId};
use crate::arm::{location, tags};
use crate::error::{ProviderError, Result};
use crate::resource::{
    blocks, first_block, ignore_not_found, BlockExt, Clients, Resource, ResourceData,
};
use crate::schema::{azure, Attribute, Block, DiffSuppress, NestedBlock, Schema};
use crate::types::Timeouts;
use crate::validation::Validator;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

const IDENTITY_TYPES: &[&str] = &["SystemAssigned", "UserAssigned", "SystemAssigned, UserAssigned"];
const LICENSE_TYPES: &[&str] = &["Windows_Client", "Windows_Server"];
const DISK_TYPES: &[&str] = &["Standard_LRS", "Premium_LRS", "StandardSSD_LRS", "UltraSSD_LRS"];
const CACHING_TYPES: &[&str] = &["None", "ReadOnly", "ReadWrite"];
const CREATE_OPTIONS: &[&str] = &["FromImage", "Empty", "Attach"];
const OS_TYPES: &[&str] = &["Linux", "Windows"];
const DIFF_DISK_OPTIONS: &[&str] = &["Local"];
const EVICTION_POLICIES: &[&str] = &["Deallocate", "Delete"];
const PRIORITIES: &[&str] = &["Regular", "Low"];
const WINRM_PROTOCOLS: &[&str] = &["Http", "Https"];
const UNATTEND_PASSES: &[&str] = &["OobeSystem"];
const UNATTEND_COMPONENTS: &[&str] = &["Microsoft-Windows-Shell-Setup"];
const UNATTEND_SETTINGS: &[&str] = &["AutoLogon", "FirstLogonCommands"];

/// `azurerm_virtual_machine`
pub struct VirtualMachineResource;

fn disk_size() -> Attribute {
    Attribute::optional_int64().with_validator(Validator::IntBetween(1, 32767))
}

fn vault_key_block(url_key: &str) -> NestedBlock {
    NestedBlock::list(
        Block::new()
            .with_attribute(
                url_key.to_string(),
                Attribute::required_string().with_validator(Validator::NoEmptyStrings),
            )
            .with_attribute("source_vault_id", Attribute::optional_string()),
    )
    .with_max_items(1)
}

fn os_disk_block() -> Block {
    Block::new()
        .with_attribute(
            "os_type",
            Attribute::optional_computed_string()
                .with_validator(Validator::one_of_ignore_case(OS_TYPES))
                .with_diff_suppress(DiffSuppress::CaseInsensitive),
        )
        .with_attribute("name", Attribute::required_string())
        .with_attribute("vhd_uri", Attribute::optional_string().with_force_new())
        .with_attribute(
            "managed_disk_id",
            Attribute::optional_computed_string().with_force_new(),
        )
        .with_attribute(
            "managed_disk_type",
            Attribute::optional_computed_string()
                .with_validator(Validator::one_of_ignore_case(DISK_TYPES)),
        )
        .with_attribute("image_uri", Attribute::optional_string())
        .with_attribute(
            "caching",
            Attribute::optional_string()
                .with_validator(Validator::one_of(CACHING_TYPES))
                .with_default(json!("None")),
        )
        .with_attribute(
            "create_option",
            Attribute::required_string().with_validator(Validator::one_of_ignore_case(CREATE_OPTIONS)),
        )
        .with_attribute("disk_size_gb", disk_size().computed())
        .with_attribute(
            "write_accelerator_enabled",
            Attribute::optional_bool().with_default(json!(false)),
        )
        .with_attribute(
            "diff_disk_option",
            Attribute::optional_string().with_validator(Validator::one_of(DIFF_DISK_OPTIONS)),
        )
        .with_block(
            "encryption_settings",
            NestedBlock::list(
                Block::new()
                    .with_attribute("enabled", Attribute::optional_bool())
                    .with_block("disk_encryption_key", vault_key_block("secret_url"))
                    .with_block("key_encryption_key", vault_key_block("key_url")),
            )
            .with_max_items(1),
        )
        .with_attribute("managed_disk_encryption_set_id", Attribute::optional_string())
}

fn data_disk_block() -> Block {
    Block::new()
        .with_attribute("name", Attribute::required_string())
        .with_attribute("vhd_uri", Attribute::optional_string())
        .with_attribute(
            "managed_disk_id",
            Attribute::optional_computed_string().with_diff_suppress(DiffSuppress::CaseInsensitive),
        )
        .with_attribute(
            "managed_disk_type",
            Attribute::optional_computed_string()
                .with_validator(Validator::one_of_ignore_case(DISK_TYPES)),
        )
        .with_attribute(
            "create_option",
            Attribute::required_string().with_validator(Validator::one_of_ignore_case(CREATE_OPTIONS)),
        )
        .with_attribute(
            "caching",
            Attribute::optional_string()
                .with_validator(Validator::one_of(CACHING_TYPES))
                .with_default(json!("None")),
        )
        .with_attribute("disk_size_gb", disk_size())
        .with_attribute("lun", Attribute::required_int64())
        .with_attribute(
            "write_accelerator_enabled",
            Attribute::optional_bool().with_default(json!(false)),
        )
        .with_attribute("to_be_detached", Attribute::optional_bool())
        .with_attribute(
            "managed_disk_encryption_set_id",
            Attribute::optional_string().with_validator(Validator::ResourceId),
        )
}

fn windows_config_block() -> Block {
    Block::new()
        .with_attribute("provision_vm_agent", Attribute::optional_bool().with_default(json!(false)))
        .with_attribute(
            "enable_automatic_upgrades",
            Attribute::optional_bool().with_default(json!(false)),
        )
        .with_attribute(
            "timezone",
            Attribute::optional_string()
                .with_force_new()
                .with_diff_suppress(DiffSuppress::CaseInsensitive),
        )
        .with_block(
            "winrm",
            NestedBlock::list(
                Block::new()
                    .with_attribute(
                        "protocol",
                        Attribute::required_string()
                            .with_validator(Validator::one_of_ignore_case(WINRM_PROTOCOLS)),
                    )
                    .with_attribute("certificate_url", Attribute::optional_string()),
            ),
        )
        .with_block(
            "additional_unattend_config",
            NestedBlock::list(
                Block::new()
                    .with_attribute(
                        "pass",
                        Attribute::required_string().with_validator(Validator::one_of(UNATTEND_PASSES)),
                    )
                    .with_attribute(
                        "component",
                        Attribute::required_string()
                            .with_validator(Validator::one_of(UNATTEND_COMPONENTS)),
                    )
                    .with_attribute(
                        "setting_name",
                        Attribute::required_string()
                            .with_validator(Validator::one_of(UNATTEND_SETTINGS)),
                    )
                    .with_attribute("content", Attribute::required_string().sensitive()),
            ),
        )
}

fn linux_config_block() -> Block {
    Block::new()
        .with_attribute("disable_password_authentication", Attribute::required_bool())
        .with_attribute("provision_vm_agent", Attribute::optional_bool())
        .with_block(
            "ssh_keys",
            NestedBlock::list(
                Block::new()
                    .with_attribute("path", Attribute::required_string())
                    .with_attribute("key_data", Attribute::required_string()),
            ),
        )
}

/// `custom_data` is sent base64-encoded; values that already decode are sent as is.
fn base64_encode_if_not(data: &str) -> String {
    match STANDARD.decode(data) {
        Ok(_) => data.to_string(),
        Err(_) => STANDARD.encode(data),
    }
}

/// A disk may reference a VHD or a managed disk, never both.
fn check_disk_source(
    vhd_uri: Option<&str>,
    managed_disk_id: Option<&str>,
    managed_disk_type: Option<&str>,
    create_option: &str,
) -> Result<()> {
    if vhd_uri.is_some() && managed_disk_id.is_some() {
        return Err(ProviderError::Validation(
            "conflict between `vhd_uri` and `managed_disk_id` (only one or the other can be used)"
                .to_string(),
        ));
    }
    if vhd_uri.is_some() && managed_disk_type.is_some() {
        return Err(ProviderError::Validation(
            "conflict between `vhd_uri` and `managed_disk_type` (only one or the other can be used)"
                .to_string(),
        ));
    }
    if vhd_uri.is_none() && managed_disk_id.is_none() && create_option.eq_ignore_ascii_case("Attach") {
        return Err(ProviderError::Validation(
            "must specify `vhd_uri` or `managed_disk_id` to attach".to_string(),
        ));
    }
    Ok(())
}

fn expand_managed_disk(block: &Map<String, Value>) -> Option<ManagedDiskParameters> {
    let id = block.str_field("managed_disk_id");
    let kind = block.str_field("managed_disk_type");
    if id.is_none() && kind.is_none() {
        return None;
    }
    Some(ManagedDiskParameters {
        id: id.map(str::to_string),
        storage_account_type: kind.map(str::to_string),
        disk_encryption_set: ResourceRef::optional(block.str_field("managed_disk_encryption_set_id")),
    })
}

fn expand_disk_encryption_settings(block: &Map<String, Value>) -> DiskEncryptionSettings {
    DiskEncryptionSettings {
        enabled: block.get("enabled").and_then(Value::as_bool),
        disk_encryption_key: first_block(block.get("disk_encryption_key")).map(|k| {
            KeyVaultSecretReference {
                secret_url: k.str_field("secret_url").unwrap_or_default().to_string(),
                source_vault: ResourceRef {
                    id: k.str_field("source_vault_id").map(str::to_string),
                },
            }
        }),
        key_encryption_key: first_block(block.get("key_encryption_key")).map(|k| {
            KeyVaultKeyReference {
                key_url: k.str_field("key_url").unwrap_or_default().to_string(),
                source_vault: ResourceRef {
                    id: k.str_field("source_vault_id").map(str::to_string),
                },
            }
        }),
    }
}

fn flatten_disk_encryption_settings(input: &DiskEncryptionSettings) -> Value {
    let disk_key: Vec<Value> = input
        .disk_encryption_key
        .iter()
        .map(|k| json!({"secret_url": k.secret_url, "source_vault_id": k.source_vault.id}))
        .collect();
    let key_key: Vec<Value> = input
        .key_encryption_key
        .iter()
        .map(|k| json!({"key_url": k.key_url, "source_vault_id": k.source_vault.id}))
        .collect();
    json!([{
        "enabled": input.enabled.unwrap_or(false),
        "disk_encryption_key": disk_key,
        "key_encryption_key": key_key,
    }])
}

fn expand_os_disk(block: &Map<String, Value>) -> Result<OsDisk> {
    let vhd_uri = block.str_field("vhd_uri");
    let create_option = block.str_field("create_option").unwrap_or_default();
    check_disk_source(
        vhd_uri,
        block.str_field("managed_disk_id"),
        block.str_field("managed_disk_type"),
        create_option,
    )?;

    Ok(OsDisk {
        name: block.str_field("name").map(str::to_string),
        os_type: block.str_field("os_type").map(str::to_string),
        vhd: vhd_uri.map(|uri| VirtualHardDisk {
            uri: Some(uri.to_string()),
        }),
        image: block.str_field("image_uri").map(|uri| VirtualHardDisk {
            uri: Some(uri.to_string()),
        }),
        caching: block.str_field("caching").map(str::to_string),
        create_option: create_option.to_string(),
        disk_size_gb: block.i64_field("disk_size_gb").filter(|s| *s > 0),
        write_accelerator_enabled: Some(block.bool_field("write_accelerator_enabled")),
        diff_disk_settings: block.str_field("diff_disk_option").map(|option| DiffDiskSettings {
            option: option.to_string(),
        }),
        encryption_settings: first_block(block.get("encryption_settings"))
            .map(expand_disk_encryption_settings),
        managed_disk: expand_managed_disk(block),
    })
}

fn expand_data_disks(disks: Vec<&Map<String, Value>>) -> Result<Vec<DataDisk>> {
    disks
        .into_iter()
        .map(|block| {
            let vhd_uri = block.str_field("vhd_uri");
            let create_option = block.str_field("create_option").unwrap_or_default();
            check_disk_source(
                vhd_uri,
                block.str_field("managed_disk_id"),
                block.str_field("managed_disk_type"),
                create_option,
            )?;
            Ok(DataDisk {
                name: block.str_field("name").map(str::to_string),
                lun: block.i64_field("lun").unwrap_or_default(),
                vhd: vhd_uri.map(|uri| VirtualHardDisk {
                    uri: Some(uri.to_string()),
                }),
                caching: block.str_field("caching").map(str::to_string),
                create_option: create_option.to_string(),
                disk_size_gb: block.i64_field("disk_size_gb").filter(|s| *s > 0),
                write_accelerator_enabled: Some(block.bool_field("write_accelerator_enabled")),
                to_be_detached: block.get("to_be_detached").and_then(Value::as_bool),
                managed_disk: expand_managed_disk(block),
            })
        })
        .collect()
}

fn expand_windows_config(block: &Map<String, Value>) -> WindowsConfiguration {
    let listeners: Vec<WinRmListener> = blocks(block.get("winrm"))
        .into_iter()
        .map(|l| WinRmListener {
            protocol: l.str_field("protocol").unwrap_or_default().to_string(),
            certificate_url: l.str_field("certificate_url").map(str::to_string),
        })
        .collect();
    WindowsConfiguration {
        provision_vm_agent: Some(block.bool_field("provision_vm_agent")),
        enable_automatic_updates: Some(block.bool_field("enable_automatic_upgrades")),
        time_zone: block.str_field("timezone").map(str::to_string),
        win_rm: (!listeners.is_empty()).then_some(WinRmConfiguration { listeners }),
        additional_unattend_content: blocks(block.get("additional_unattend_config"))
            .into_iter()
            .map(|c| AdditionalUnattendContent {
                pass_name: c.str_field("pass").unwrap_or_default().to_string(),
                component_name: c.str_field("component").unwrap_or_default().to_string(),
                setting_name: c.str_field("setting_name").unwrap_or_default().to_string(),
                content: c.str_field("content").map(str::to_string),
            })
            .collect(),
    }
}

fn expand_linux_config(block: &Map<String, Value>) -> LinuxConfiguration {
    let public_keys: Vec<SshPublicKey> = blocks(block.get("ssh_keys"))
        .into_iter()
        .map(|k| SshPublicKey {
            path: k.str_field("path").unwrap_or_default().to_string(),
            key_data: k.str_field("key_data").unwrap_or_default().to_string(),
        })
        .collect();
    LinuxConfiguration {
        disable_password_authentication: block.bool_field("disable_password_authentication"),
        provision_vm_agent: block.get("provision_vm_agent").and_then(Value::as_bool),
        ssh: (!public_keys.is_empty()).then_some(SshConfiguration { public_keys }),
    }
}

fn expand_os_profile(d: &ResourceData, block: &Map<String, Value>) -> Result<OsProfile> {
    let windows = d.get_block("os_profile_windows_config").map(expand_windows_config);
    let linux = d.get_block("os_profile_linux_config").map(expand_linux_config);
    if windows.is_none() && linux.is_none() {
        return Err(ProviderError::Validation(
            "either a `os_profile_linux_config` or a `os_profile_windows_config` must be specified"
                .to_string(),
        ));
    }

    let secrets = d
        .get_blocks("os_profile_secrets")
        .into_iter()
        .map(|s| VaultSecretGroup {
            source_vault: ResourceRef::new(s.str_field("source_vault_id").unwrap_or_default()),
            vault_certificates: blocks(s.get("vault_certificates"))
                .into_iter()
                .map(|c| VaultCertificate {
                    certificate_url: c.str_field("certificate_url").unwrap_or_default().to_string(),
                    certificate_store: c.str_field("certificate_store").map(str::to_string),
                })
                .collect(),
        })
        .collect();

    Ok(OsProfile {
        computer_name: block.str_field("computer_name").map(str::to_string),
        admin_username: block.str_field("admin_username").map(str::to_string),
        admin_password: block.str_field("admin_password").map(str::to_string),
        custom_data: block.str_field("custom_data").map(base64_encode_if_not),
        allow_extension_operations: block.get("allow_extension_operations").and_then(Value::as_bool),
        require_guest_provision_signal: block
            .get("require_guest_provision_signal")
            .and_then(Value::as_bool),
        windows_configuration: windows,
        linux_configuration: linux,
        secrets,
    })
}

fn expand_network_profile(d: &ResourceData) -> NetworkProfile {
    let primary = d.get_str("primary_network_interface_id");
    NetworkProfile {
        network_interfaces: d
            .get_string_list("network_interface_ids")
            .into_iter()
            .map(|id| NetworkInterfaceReference {
                properties: Some(NetworkInterfaceReferenceProperties {
                    primary: primary == Some(id.as_str()),
                }),
                id,
            })
            .collect(),
    }
}

fn expand_identity(block: &Map<String, Value>) -> VirtualMachineIdentity {
    let kind = block.str_field("type").unwrap_or_default().to_string();
    let user_assigned = kind
        .to_ascii_lowercase()
        .contains("userassigned")
        .then(|| {
            block
                .string_list_field("identity_ids")
                .into_iter()
                .map(|id| (id, json!({})))
                .collect::<BTreeMap<_, _>>()
        });
    VirtualMachineIdentity {
        kind,
        principal_id: None,
        user_assigned_identities: user_assigned,
    }
}

fn flatten_identity(identity: &VirtualMachineIdentity) -> Value {
    let ids: Vec<&String> = identity
        .user_assigned_identities
        .iter()
        .flat_map(|m| m.keys())
        .collect();
    json!({
        "type": identity.kind,
        "principal_id": identity.principal_id,
        "identity_ids": ids,
    })
}

/// Disk type and size come from the disk itself when the disk is managed.
fn revise_disk_info(result: &mut Map<String, Value>, disk: Option<&Disk>) {
    let Some(disk) = disk else {
        return;
    };
    if let Some(sku) = &disk.sku {
        result.insert("managed_disk_type".to_string(), json!(sku.name));
    }
    if let Some(size) = disk.properties.disk_size_gb {
        result.insert("disk_size_gb".to_string(), json!(size));
    }
}

fn flatten_os_disk(disk: &OsDisk, info: Option<&Disk>) -> Value {
    let mut result = Map::new();
    result.insert("name".to_string(), json!(disk.name));
    result.insert("vhd_uri".to_string(), json!(disk.vhd.as_ref().and_then(|v| v.uri.clone())));
    result.insert("image_uri".to_string(), json!(disk.image.as_ref().and_then(|v| v.uri.clone())));
    if let Some(managed) = &disk.managed_disk {
        result.insert("managed_disk_type".to_string(), json!(managed.storage_account_type));
        result.insert("managed_disk_id".to_string(), json!(managed.id));
        result.insert(
            "managed_disk_encryption_set_id".to_string(),
            json!(managed.disk_encryption_set.as_ref().and_then(|s| s.id.clone())),
        );
    }
    result.insert("create_option".to_string(), json!(disk.create_option));
    result.insert("caching".to_string(), json!(disk.caching));
    result.insert("disk_size_gb".to_string(), json!(disk.disk_size_gb));
    result.insert("os_type".to_string(), json!(disk.os_type));
    result.insert(
        "write_accelerator_enabled".to_string(),
        json!(disk.write_accelerator_enabled.unwrap_or(false)),
    );
    result.insert(
        "diff_disk_option".to_string(),
        json!(disk.diff_disk_settings.as_ref().map(|s| s.option.clone())),
    );
    result.insert(
        "encryption_settings".to_string(),
        disk.encryption_settings
            .as_ref()
            .map(flatten_disk_encryption_settings)
            .unwrap_or_else(|| json!([])),
    );
    revise_disk_info(&mut result, info);
    Value::Object(result)
}

fn flatten_data_disk(disk: &DataDisk, info: Option<&Disk>) -> Value {
    let mut result = Map::new();
    result.insert("name".to_string(), json!(disk.name));
    result.insert("vhd_uri".to_string(), json!(disk.vhd.as_ref().and_then(|v| v.uri.clone())));
    if let Some(managed) = &disk.managed_disk {
        result.insert("managed_disk_type".to_string(), json!(managed.storage_account_type));
        result.insert("managed_disk_id".to_string(), json!(managed.id));
        result.insert(
            "managed_disk_encryption_set_id".to_string(),
            json!(managed.disk_encryption_set.as_ref().and_then(|s| s.id.clone())),
        );
    }
    result.insert("create_option".to_string(), json!(disk.create_option));
    result.insert("caching".to_string(), json!(disk.caching));
    result.insert("disk_size_gb".to_string(), json!(disk.disk_size_gb));
    result.insert("lun".to_string(), json!(disk.lun));
    result.insert(
        "write_accelerator_enabled".to_string(),
        json!(disk.write_accelerator_enabled.unwrap_or(false)),
    );
    result.insert("to_be_detached".to_string(), json!(disk.to_be_detached));
    revise_disk_info(&mut result, info);
    Value::Object(result)
}

/// `admin_password` is never returned by the API, so the configured value is kept.
fn flatten_os_profile(profile: &OsProfile, existing: Option<&Map<String, Value>>) -> Value {
    let kept = |key: &str| existing.and_then(|e| e.get(key)).cloned().unwrap_or(Value::Null);
    json!({
        "computer_name": profile.computer_name,
        "admin_username": profile.admin_username,
        "admin_password": kept("admin_password"),
        "custom_data": profile.custom_data.clone().map(Value::from).unwrap_or_else(|| kept("custom_data")),
        "allow_extension_operations": profile.allow_extension_operations,
        "require_guest_provision_signal": profile.require_guest_provision_signal,
    })
}

fn flatten_windows_config(
    config: &WindowsConfiguration,
    existing: Option<&Map<String, Value>>,
) -> Value {
    let winrm: Vec<Value> = config
        .win_rm
        .iter()
        .flat_map(|w| &w.listeners)
        .map(|l| json!({"protocol": l.protocol, "certificate_url": l.certificate_url}))
        .collect();
    // The unattend content is write-only; match it back up by setting name.
    let prior_content = |setting: &str| {
        existing
            .map(|e| blocks(e.get("additional_unattend_config")))
            .unwrap_or_default()
            .into_iter()
            .find(|c| c.str_field("setting_name") == Some(setting))
            .and_then(|c| c.get("content").cloned())
            .unwrap_or(Value::Null)
    };
    let unattend: Vec<Value> = config
        .additional_unattend_content
        .iter()
        .map(|c| {
            json!({
                "pass": c.pass_name,
                "component": c.component_name,
                "setting_name": c.setting_name,
                "content": c.content.clone().map(Value::from).unwrap_or_else(|| prior_content(&c.setting_name)),
            })
        })
        .collect();
    json!({
        "provision_vm_agent": config.provision_vm_agent.unwrap_or(false),
        "enable_automatic_upgrades": config.enable_automatic_updates.unwrap_or(false),
        "timezone": config.time_zone,
        "winrm": winrm,
        "additional_unattend_config": unattend,
    })
}

fn flatten_linux_config(config: &LinuxConfiguration) -> Value {
    let keys: Vec<Value> = config
        .ssh
        .iter()
        .flat_map(|s| &s.public_keys)
        .map(|k| json!({"path": k.path, "key_data": k.key_data}))
        .collect();
    json!({
        "disable_password_authentication": config.disable_password_authentication,
        "provision_vm_agent": config.provision_vm_agent,
        "ssh_keys": keys,
    })
}

fn flatten_secrets(secrets: &[VaultSecretGroup]) -> Vec<Value> {
    secrets
        .iter()
        .map(|s| {
            let certificates: Vec<Value> = s
                .vault_certificates
                .iter()
                .map(|c| json!({"certificate_url": c.certificate_url, "certificate_store": c.certificate_store}))
                .collect();
            json!({"source_vault_id": s.source_vault.id, "vault_certificates": certificates})
        })
        .collect()
}

/// Look up a managed disk referenced by the VM.
async fn managed_disk_info(
    clients: &Clients,
    managed: Option<&ManagedDiskParameters>,
) -> Result<Option<Disk>> {
    let Some(id) = managed.and_then(|m| m.id.as_deref()) else {
        return Ok(None);
    };
    let id = ManagedDiskId::parse(id)?;
    let disk = get_as(clients.arm(), &id.id(), COMPUTE).await.map_err(|e| {
        ProviderError::FailedPrecondition(format!("retrieving {}: {}", id, e.message()))
    })?;
    Ok(Some(disk))
}

impl VirtualMachineResource {
    fn expand(&self, d: &ResourceData, name: &str) -> Result<VirtualMachine> {
        let os_disk = d
            .get_block("storage_os_disk")
            .ok_or_else(|| ProviderError::Validation("`storage_os_disk` is required".to_string()))
            .and_then(expand_os_disk)?;

        let storage_profile = StorageProfile {
            image_reference: d.get_block("storage_image_reference").map(|image| ImageReference {
                id: image.str_field("id").map(str::to_string),
                publisher: image.str_field("publisher").map(str::to_string),
                offer: image.str_field("offer").map(str::to_string),
                sku: image.str_field("sku").map(str::to_string),
                version: image.str_field("version").map(str::to_string),
            }),
            os_disk: Some(os_disk),
            data_disks: expand_data_disks(d.get_blocks("storage_data_disk"))?,
        };

        let os_profile = match d.get_block("os_profile") {
            Some(block) => Some(expand_os_profile(d, block)?),
            None => None,
        };

        let properties = VirtualMachineProperties {
            hardware_profile: Some(HardwareProfile {
                vm_size: d.get_string("vm_size"),
            }),
            storage_profile: Some(storage_profile),
            os_profile,
            network_profile: Some(expand_network_profile(d)),
            diagnostics_profile: d.get_block("boot_diagnostics").map(|b| DiagnosticsProfile {
                boot_diagnostics: Some(BootDiagnostics {
                    enabled: b.bool_field("enabled"),
                    storage_uri: b.str_field("storage_uri").map(str::to_string),
                }),
            }),
            additional_capabilities: d.get_block("additional_capabilities").map(|b| {
                AdditionalCapabilities {
                    ultra_ssd_enabled: Some(b.bool_field("ultra_ssd_enabled")),
                }
            }),
            availability_set: ResourceRef::optional(d.get_str("availability_set_id")),
            proximity_placement_group: ResourceRef::optional(d.get_str("proximity_placement_group_id")),
            host: ResourceRef::optional(d.get_str("host_id")),
            virtual_machine_scale_set: ResourceRef::optional(d.get_str("virtual_machine_scale_set_id")),
            license_type: d.get_string("license_type"),
            billing_profile: d.get_f64("billing_profile_max_price").map(|price| BillingProfile {
                max_price: Some(price),
            }),
            eviction_policy: d.get_string("eviction_policy"),
            priority: d.get_string("priority"),
        };

        Ok(VirtualMachine {
            name: Some(name.to_string()),
            location: d.get_str("location").map(location::normalize),
            zones: d.get_string_list("zones"),
            tags: tags::expand(d.get("tags")),
            plan: d.get_block("plan").map(|p| Plan {
                name: p.str_field("name").unwrap_or_default().to_string(),
                publisher: p.str_field("publisher").unwrap_or_default().to_string(),
                product: p.str_field("product").unwrap_or_default().to_string(),
            }),
            identity: d.get_block("identity").map(expand_identity),
            properties,
            ..Default::default()
        })
    }

    async fn create_or_update(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        info!("preparing arguments for virtual machine creation");
        let name = d.required_str("name")?.to_string();
        let id = VirtualMachineId::new(
            &clients.subscription_id,
            d.required_str("resource_group_name")?,
            &name,
        );

        if d.is_new_resource() {
            clients
                .check_not_exists(self.type_name(), &id.id(), COMPUTE)
                .await?;
        }

        let vm = self.expand(d, &name)?;

        let _guard = clients.locks.by_name(&name, VM_LOCK_TYPE).await;
        let created: VirtualMachine = put_as(clients.arm(), &id.id(), COMPUTE, &vm).await?;
        let resource_id = created.id.ok_or_else(|| {
            ProviderError::FailedPrecondition(format!("cannot read {} ID", id))
        })?;
        d.set_id(resource_id);
        self.read(clients, d).await
    }

    /// Delete one of the VM's disks after the VM itself is gone.
    async fn delete_disk(
        &self,
        clients: &Clients,
        vm: &VirtualMachineId,
        disk_name: Option<&str>,
        vhd: Option<&VirtualHardDisk>,
        managed: Option<&ManagedDiskParameters>,
    ) -> Result<()> {
        if let Some(id) = managed.and_then(|m| m.id.as_deref()) {
            let id = ManagedDiskId::parse(id)?;
            info!(%id, "deleting managed disk");
            return ignore_not_found(clients.arm().delete(&id.id(), COMPUTE).await);
        }
        if let Some(uri) = vhd.and_then(|v| v.uri.as_deref()) {
            warn!(%vm, vhd_uri = %uri, "leaving unmanaged disk blob in place");
            return Ok(());
        }
        Err(ProviderError::FailedPrecondition(format!(
            "unable to determine the type of disk {:?} to delete for {}",
            disk_name.unwrap_or_default(),
            vm
        )))
    }
}

#[async_trait]
impl Resource for VirtualMachineResource {
    fn type_name(&self) -> &'static str {
        "azurerm_virtual_machine"
    }

    fn timeouts(&self) -> Timeouts {
        Timeouts::minutes(60, 5, 60, 60)
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("name", Attribute::required_string().with_force_new())
            .with_attribute("location", azure::location())
            .with_attribute("resource_group_name", azure::resource_group_name())
            .with_attribute("zones", azure::single_zone())
            .with_block(
                "plan",
                NestedBlock::list(
                    Block::new()
                        .with_attribute("name", Attribute::required_string())
                        .with_attribute("publisher", Attribute::required_string())
                        .with_attribute("product", Attribute::required_string()),
                )
                .with_max_items(1),
            )
            .with_attribute(
                "availability_set_id",
                Attribute::optional_computed_string()
                    .with_force_new()
                    .with_diff_suppress(DiffSuppress::CaseInsensitive),
            )
            .with_attribute(
                "proximity_placement_group_id",
                Attribute::optional_string()
                    .with_force_new()
                    .with_diff_suppress(DiffSuppress::CaseInsensitive),
            )
            .with_block(
                "identity",
                NestedBlock::list(
                    Block::new()
                        .with_attribute(
                            "type",
                            Attribute::required_string()
                                .with_validator(Validator::one_of(IDENTITY_TYPES))
                                .with_diff_suppress(DiffSuppress::CaseInsensitive),
                        )
                        .with_attribute("principal_id", Attribute::computed_string())
                        .with_attribute(
                            "identity_ids",
                            Attribute::optional_string_list().with_validator(Validator::NoEmptyStrings),
                        ),
                )
                .with_max_items(1)
                .computed(),
            )
            .with_attribute(
                "license_type",
                Attribute::optional_computed_string()
                    .with_validator(Validator::one_of_ignore_case(LICENSE_TYPES))
                    .with_diff_suppress(DiffSuppress::CaseInsensitive),
            )
            .with_attribute(
                "vm_size",
                Attribute::optional_string().with_validator(Validator::NoEmptyStrings),
            )
            .with_block(
                "storage_image_reference",
                NestedBlock::list(
                    Block::new()
                        .with_attribute("id", Attribute::optional_string().with_force_new())
                        .with_attribute("publisher", Attribute::optional_string().with_force_new())
                        .with_attribute("offer", Attribute::optional_string().with_force_new())
                        .with_attribute("sku", Attribute::optional_string().with_force_new())
                        .with_attribute(
                            "version",
                            Attribute::optional_computed_string().with_force_new(),
                        ),
                )
                .with_max_items(1)
                .with_force_new()
                .computed(),
            )
            .with_block(
                "storage_os_disk",
                NestedBlock::list(os_disk_block()).with_min_items(1).with_max_items(1),
            )
            .with_attribute(
                "delete_os_disk_on_termination",
                Attribute::optional_bool().with_default(json!(false)),
            )
            .with_block("storage_data_disk", NestedBlock::list(data_disk_block()).computed())
            .with_attribute(
                "delete_data_disks_on_termination",
                Attribute::optional_bool().with_default(json!(false)),
            )
            .with_block(
                "boot_diagnostics",
                NestedBlock::list(
                    Block::new()
                        .with_attribute("enabled", Attribute::required_bool())
                        .with_attribute("storage_uri", Attribute::required_string()),
                )
                .with_max_items(1),
            )
            .with_block(
                "additional_capabilities",
                NestedBlock::list(
                    Block::new().with_attribute(
                        "ultra_ssd_enabled",
                        Attribute::required_bool().with_force_new(),
                    ),
                )
                .with_max_items(1),
            )
            .with_block(
                "os_profile",
                NestedBlock::list(
                    Block::new()
                        .with_attribute(
                            "computer_name",
                            Attribute::required_string().with_force_new(),
                        )
                        .with_attribute("admin_username", Attribute::required_string())
                        .with_attribute("admin_password", Attribute::optional_string().sensitive())
                        .with_attribute(
                            "custom_data",
                            Attribute::optional_computed_string().with_force_new(),
                        )
                        .with_attribute("allow_extension_operations", Attribute::optional_bool())
                        .with_attribute("require_guest_provision_signal", Attribute::optional_bool()),
                )
                .with_max_items(1),
            )
            .with_block(
                "os_profile_windows_config",
                NestedBlock::list(windows_config_block()).with_max_items(1),
            )
            .with_block(
                "os_profile_linux_config",
                NestedBlock::list(linux_config_block()).with_max_items(1),
            )
            .with_block(
                "os_profile_secrets",
                NestedBlock::list(
                    Block::new()
                        .with_attribute("source_vault_id", Attribute::required_string())
                        .with_block(
                            "vault_certificates",
                            NestedBlock::list(
                                Block::new()
                                    .with_attribute("certificate_url", Attribute::required_string())
                                    .with_attribute("certificate_store", Attribute::optional_string()),
                            ),
                        ),
                ),
            )
            .with_attribute("network_interface_ids", Attribute::required_string_list())
            .with_attribute("primary_network_interface_id", Attribute::optional_string())
            .with_attribute("billing_profile_max_price", Attribute::optional_float64())
            .with_attribute(
                "eviction_policy",
                Attribute::optional_string()
                    .with_validator(Validator::one_of(EVICTION_POLICIES))
                    .with_default(json!("Deallocate")),
            )
            .with_attribute(
                "host_id",
                Attribute::optional_string().with_diff_suppress(DiffSuppress::CaseInsensitive),
            )
            .with_attribute(
                "priority",
                Attribute::optional_string()
                    .with_validator(Validator::one_of(PRIORITIES))
                    .with_default(json!("Regular")),
            )
            .with_attribute(
                "virtual_machine_scale_set_id",
                Attribute::optional_string().with_diff_suppress(DiffSuppress::CaseInsensitive),
            )
            .with_attribute("tags", azure::tags())
    }

    async fn create(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        self.create_or_update(clients, d).await
    }

    async fn read(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = VirtualMachineId::parse(d.id())?;
        let vm: VirtualMachine = match get_as(clients.arm(), &id.id(), COMPUTE).await {
            Ok(vm) => vm,
            Err(e) if e.is_not_found() => {
                info!(%id, "virtual machine does not exist; removing from state");
                d.clear_id();
                return Ok(());
            },
            Err(e) => return Err(e),
        };

        d.set("name", vm.name.clone().unwrap_or_else(|| id.name.clone()));
        d.set("resource_group_name", id.resource_group.as_str());
        d.set("zones", vm.zones.clone());
        d.set("location", vm.location.as_deref().map(location::normalize));
        d.set_block(
            "plan",
            vm.plan
                .as_ref()
                .map(|p| json!({"name": p.name, "publisher": p.publisher, "product": p.product})),
        );
        d.set_block("identity", vm.identity.as_ref().map(flatten_identity));

        let props = &vm.properties;
        if let Some(policy) = &props.eviction_policy {
            d.set("eviction_policy", policy.as_str());
        }
        if let Some(priority) = &props.priority {
            d.set("priority", priority.as_str());
        }
        if let Some(price) = props.billing_profile.as_ref().and_then(|b| b.max_price) {
            d.set("billing_profile_max_price", price);
        }
        if let Some(host) = props.host.as_ref().and_then(|h| h.id.clone()) {
            d.set("host_id", host);
        }
        if let Some(vmss) = props.virtual_machine_scale_set.as_ref().and_then(|s| s.id.clone()) {
            d.set("virtual_machine_scale_set_id", vmss);
        }
        // The API returns the availability set's resource group in upper case.
        if let Some(set) = props.availability_set.as_ref().and_then(|s| s.id.as_deref()) {
            d.set("availability_set_id", set.to_ascii_lowercase());
        }
        if let Some(group) = props.proximity_placement_group.as_ref().and_then(|p| p.id.clone()) {
            d.set("proximity_placement_group_id", group);
        }
        if let Some(license) = &props.license_type {
            d.set("license_type", license.as_str());
        }
        if let Some(size) = props.hardware_profile.as_ref().and_then(|h| h.vm_size.clone()) {
            d.set("vm_size", size);
        }

        if let Some(storage) = &props.storage_profile {
            d.set_block(
                "storage_image_reference",
                storage.image_reference.as_ref().map(|i| {
                    json!({
                        "id": i.id,
                        "publisher": i.publisher,
                        "offer": i.offer,
                        "sku": i.sku,
                        "version": i.version,
                    })
                }),
            );

            if let Some(os_disk) = &storage.os_disk {
                let info = managed_disk_info(clients, os_disk.managed_disk.as_ref()).await?;
                d.set_block("storage_os_disk", Some(flatten_os_disk(os_disk, info.as_ref())));
            }

            let mut data_disks = Vec::with_capacity(storage.data_disks.len());
            for disk in &storage.data_disks {
                let info = managed_disk_info(clients, disk.managed_disk.as_ref()).await?;
                data_disks.push(flatten_data_disk(disk, info.as_ref()));
            }
            d.set("storage_data_disk", data_disks);
        }

        if let Some(profile) = &props.os_profile {
            let existing_profile = d.get_block("os_profile").cloned();
            let existing_windows = d.get_block("os_profile_windows_config").cloned();
            d.set_block(
                "os_profile",
                Some(flatten_os_profile(profile, existing_profile.as_ref())),
            );
            d.set_block(
                "os_profile_windows_config",
                profile
                    .windows_configuration
                    .as_ref()
                    .map(|w| flatten_windows_config(w, existing_windows.as_ref())),
            );
            d.set_block(
                "os_profile_linux_config",
                profile.linux_configuration.as_ref().map(flatten_linux_config),
            );
            d.set("os_profile_secrets", flatten_secrets(&profile.secrets));
        }

        if let Some(diagnostics) = props.diagnostics_profile.as_ref() {
            d.set_block(
                "boot_diagnostics",
                diagnostics
                    .boot_diagnostics
                    .as_ref()
                    .map(|b| json!({"enabled": b.enabled, "storage_uri": b.storage_uri})),
            );
        }
        d.set_block(
            "additional_capabilities",
            props
                .additional_capabilities
                .as_ref()
                .map(|c| json!({"ultra_ssd_enabled": c.ultra_ssd_enabled.unwrap_or(false)})),
        );

        if let Some(network) = &props.network_profile {
            let ids: Vec<&str> = network.network_interfaces.iter().map(|n| n.id.as_str()).collect();
            d.set("network_interface_ids", ids);
            if let Some(primary) = network.network_interfaces.iter().find(|n| n.is_primary()) {
                d.set("primary_network_interface_id", primary.id.as_str());
            }
        }

        d.set("tags", tags::flatten(serde_json::to_value(&vm.tags).ok().as_ref()));
        Ok(())
    }

    async fn update(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        self.create_or_update(clients, d).await
    }

    async fn delete(&self, clients: &Clients, d: &mut ResourceData) -> Result<()> {
        let id = VirtualMachineId::parse(d.id())?;
        let _guard = clients.locks.by_name(&id.name, VM_LOCK_TYPE).await;

        let vm: VirtualMachine = match get_as(clients.arm(), &id.id(), COMPUTE).await {
            Ok(vm) => vm,
            Err(e) if e.is_not_found() => {
                debug!(%id, "virtual machine already gone");
                return Ok(());
            },
            Err(e) => return Err(e),
        };

        info!(%id, "deleting virtual machine");
        clients.arm().delete(&id.id(), COMPUTE).await?;

        let delete_os_disk = d.get_bool("delete_os_disk_on_termination").unwrap_or(false);
        let delete_data_disks = d.get_bool("delete_data_disks_on_termination").unwrap_or(false);
        if !delete_os_disk && !delete_data_disks {
            return Ok(());
        }

        let storage = vm.properties.storage_profile.as_ref().ok_or_else(|| {
            ProviderError::FailedPrecondition(format!(
                "cannot delete disks for {}: the storage profile was empty",
                id
            ))
        })?;

        if delete_os_disk {
            info!(%id, "delete_os_disk_on_termination is enabled, deleting the OS disk");
            let os_disk = storage.os_disk.as_ref().ok_or_else(|| {
                ProviderError::FailedPrecondition(format!(
                    "cannot delete the OS disk for {}: the OS disk was empty",
                    id
                ))
            })?;
            self.delete_disk(
                clients,
                &id,
                os_disk.name.as_deref(),
                os_disk.vhd.as_ref(),
                os_disk.managed_disk.as_ref(),
            )
            .await?;
        }

        if delete_data_disks {
            info!(%id, count = storage.data_disks.len(), "delete_data_disks_on_termination is enabled, deleting data disks");
            for disk in &storage.data_disks {
                self.delete_disk(
                    clients,
                    &id,
                    disk.name.as_deref(),
                    disk.vhd.as_ref(),
                    disk.managed_disk.as_ref(),
                )
                .await?;
            }
        }
        Ok(())
    }

    fn validate_import_id(&self, id: &str) -> Result<()> {
        VirtualMachineId::parse(id).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeResourceManager;
    use std::sync::Arc;

    const ID: &str = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm1";
    const OS_DISK: &str = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/disks/osdisk";
    const DATA_DISK: &str = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/disks/data1";
    const NIC: &str = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/networkInterfaces/nic1";

    fn config() -> Value {
        json!({
            "name": "vm1",
            "resource_group_name": "rg",
            "location": "West Europe",
            "vm_size": "Standard_DS1_v2",
            "network_interface_ids": [NIC],
            "primary_network_interface_id": NIC,
            "storage_image_reference": [{
                "publisher": "Canonical",
                "offer": "UbuntuServer",
                "sku": "16.04-LTS",
                "version": "latest"
            }],
            "storage_os_disk": [{
                "name": "osdisk",
                "caching": "ReadWrite",
                "create_option": "FromImage",
                "managed_disk_type": "Standard_LRS"
            }],
            "os_profile": [{
                "computer_name": "host1",
                "admin_username": "testadmin",
                "admin_password": "Password1234!",
                "custom_data": "echo hello"
            }],
            "os_profile_linux_config": [{"disable_password_authentication": false}],
            "delete_os_disk_on_termination": false,
            "delete_data_disks_on_termination": false,
            "tags": {"env": "dev"}
        })
    }

    fn clients(fake: &Arc<FakeResourceManager>) -> Clients {
        Clients::new(fake.clone(), "sub")
    }

    #[tokio::test]
    async fn test_create_linux_vm() {
        let fake = Arc::new(FakeResourceManager::new());
        let mut d = ResourceData::for_create(config());
        VirtualMachineResource.create(&clients(&fake), &mut d).await.unwrap();

        let stored = fake.stored(ID).unwrap();
        let props = &stored["properties"];
        assert_eq!(props["hardwareProfile"]["vmSize"], "Standard_DS1_v2");
        assert_eq!(
            props["storageProfile"]["osDisk"]["managedDisk"]["storageAccountType"],
            "Standard_LRS"
        );
        assert_eq!(props["networkProfile"]["networkInterfaces"][0]["properties"]["primary"], true);
        assert_eq!(props["osProfile"]["customData"], STANDARD.encode("echo hello"));
        assert_eq!(
            props["osProfile"]["linuxConfiguration"]["disablePasswordAuthentication"],
            false
        );
        assert!(props["osProfile"].get("windowsConfiguration").is_none());

        assert_eq!(d.id(), ID);
        assert_eq!(d.get_str("location"), Some("westeurope"));
        assert_eq!(d.get_str("primary_network_interface_id"), Some(NIC));
        let profile = d.get_block("os_profile").unwrap();
        assert_eq!(profile.str_field("admin_password"), Some("Password1234!"));
    }

    #[tokio::test]
    async fn test_os_profile_needs_an_os_config() {
        let fake = Arc::new(FakeResourceManager::new());
        let mut cfg = config();
        cfg.as_object_mut().unwrap().remove("os_profile_linux_config");
        let mut d = ResourceData::for_create(cfg);
        let err = VirtualMachineResource
            .create(&clients(&fake), &mut d)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("os_profile_linux_config"));
        assert!(fake.calls_to("PUT").is_empty());
    }

    #[tokio::test]
    async fn test_disk_source_conflicts() {
        let fake = Arc::new(FakeResourceManager::new());

        let mut cfg = config();
        cfg["storage_os_disk"][0]["vhd_uri"] = json!("https://acct.blob.core.windows.net/vhds/os.vhd");
        let mut d = ResourceData::for_create(cfg);
        let err = VirtualMachineResource
            .create(&clients(&fake), &mut d)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("managed_disk_type"));

        let mut cfg = config();
        cfg["storage_data_disk"] = json!([{"name": "data1", "lun": 0, "create_option": "Attach"}]);
        let mut d = ResourceData::for_create(cfg);
        let err = VirtualMachineResource
            .create(&clients(&fake), &mut d)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("to attach"));
    }

    fn seed_vm(fake: &FakeResourceManager) {
        fake.seed(
            ID,
            json!({
                "id": ID,
                "name": "vm1",
                "location": "westeurope",
                "properties": {
                    "availabilitySet": {"id": "/subscriptions/sub/resourceGroups/RG/providers/Microsoft.Compute/availabilitySets/AS1"},
                    "hardwareProfile": {"vmSize": "Standard_DS1_v2"},
                    "storageProfile": {
                        "osDisk": {
                            "name": "osdisk",
                            "createOption": "FromImage",
                            "managedDisk": {"id": OS_DISK, "storageAccountType": "Standard_LRS"}
                        },
                        "dataDisks": [
                            {"name": "data1", "lun": 0, "createOption": "Empty", "managedDisk": {"id": DATA_DISK}},
                            {"name": "legacy", "lun": 1, "createOption": "Empty", "vhd": {"uri": "https://acct.blob.core.windows.net/vhds/legacy.vhd"}}
                        ]
                    },
                    "osProfile": {
                        "computerName": "host1",
                        "adminUsername": "testadmin",
                        "linuxConfiguration": {"disablePasswordAuthentication": true}
                    },
                    "networkProfile": {"networkInterfaces": [{"id": NIC, "properties": {"primary": true}}]}
                }
            }),
        );
        fake.seed(OS_DISK, json!({"id": OS_DISK, "sku": {"name": "Premium_LRS"}, "properties": {"diskSizeGB": 64}}));
        fake.seed(DATA_DISK, json!({"id": DATA_DISK, "sku": {"name": "Standard_LRS"}, "properties": {"diskSizeGB": 10}}));
    }

    #[tokio::test]
    async fn test_read_enriches_managed_disks() {
        let fake = Arc::new(FakeResourceManager::new());
        seed_vm(&fake);

        let mut state = config();
        state["id"] = json!(ID);
        let mut d = ResourceData::from_state(state);
        VirtualMachineResource.read(&clients(&fake), &mut d).await.unwrap();

        let os_disk = d.get_block("storage_os_disk").unwrap();
        assert_eq!(os_disk.str_field("managed_disk_type"), Some("Premium_LRS"));
        assert_eq!(os_disk.i64_field("disk_size_gb"), Some(64));
        let data = d.get_blocks("storage_data_disk");
        assert_eq!(data.len(), 2);
        assert_eq!(data[0].i64_field("disk_size_gb"), Some(10));
        assert_eq!(
            data[1].str_field("vhd_uri"),
            Some("https://acct.blob.core.windows.net/vhds/legacy.vhd")
        );
        assert_eq!(
            d.get_str("availability_set_id"),
            Some("/subscriptions/sub/resourcegroups/rg/providers/microsoft.compute/availabilitysets/as1")
        );
        assert_eq!(
            d.get_block("os_profile").and_then(|p| p.str_field("admin_password")),
            Some("Password1234!")
        );
        assert!(d.get_block("os_profile_linux_config").unwrap().bool_field("disable_password_authentication"));
        assert_eq!(d.get("os_profile_windows_config"), Some(&json!([])));
    }

    #[tokio::test]
    async fn test_read_missing_vm_clears_id() {
        let fake = Arc::new(FakeResourceManager::new());
        let mut d = ResourceData::from_state(json!({"id": ID}));
        VirtualMachineResource.read(&clients(&fake), &mut d).await.unwrap();
        assert_eq!(d.into_state(), Value::Null);
    }

    #[tokio::test]
    async fn test_delete_keeps_disks_by_default() {
        let fake = Arc::new(FakeResourceManager::new());
        seed_vm(&fake);
        let mut state = config();
        state["id"] = json!(ID);
        let mut d = ResourceData::from_state(state);
        VirtualMachineResource.delete(&clients(&fake), &mut d).await.unwrap();
        assert_eq!(fake.calls_to("DELETE"), vec![ID.to_string()]);
        assert!(fake.stored(OS_DISK).is_some());
    }

    #[tokio::test]
    async fn test_delete_removes_managed_disks_when_asked() {
        let fake = Arc::new(FakeResourceManager::new());
        seed_vm(&fake);
        let mut state = config();
        state["id"] = json!(ID);
        state["delete_os_disk_on_termination"] = json!(true);
        state["delete_data_disks_on_termination"] = json!(true);
        let mut d = ResourceData::from_state(state);
        VirtualMachineResource.delete(&clients(&fake), &mut d).await.unwrap();

        assert_eq!(
            fake.calls_to("DELETE"),
            vec![ID.to_string(), OS_DISK.to_string(), DATA_DISK.to_string()]
        );
        assert!(fake.stored(OS_DISK).is_none());
        assert!(fake.stored(DATA_DISK).is_none());
    }

    #[test]
    fn test_base64_encode_if_not() {
        assert_eq!(base64_encode_if_not("aGVsbG8="), "aGVsbG8=");
        assert_eq!(base64_encode_if_not("hello world"), STANDARD.encode("hello world"));
    }
}
