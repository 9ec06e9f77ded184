use std::path::Path;

use log::{debug, info};
use serde_json::Value;

use super::Cpi;
use crate::{
    cloudprops::StemcellCloudProperties,
    error::{Error, Result, WithContext},
    ids, stemcell,
};

impl Cpi {
    /// Unpack the image and import its OVF as a template VM
    pub(crate) async fn create_stemcell(&self, image_path: &str, cloud_properties: &Value) -> Result<Value> {
        let props = StemcellCloudProperties::from_value(cloud_properties)?;
        debug!("Stemcell {} version {}", props.name, props.version);

        let unpacked = tempfile::tempdir().map_err(|e| Error::io("stemcell", e))?;
        let ovf = stemcell::unpack_image(Path::new(image_path), unpacked.path())
            .context("unpacking stemcell")?;

        let cid = ids::new_cid();
        let name = ids::stemcell_name(&cid);
        info!("Importing stemcell {} as {}", props.name, name);
        self.driver.import_image(&ovf, &name).await?;
        Ok(Value::String(cid))
    }

    pub(crate) async fn delete_stemcell(&self, stemcell_cid: &str) -> Result<Value> {
        let name = ids::stemcell_name(stemcell_cid);
        self.driver
            .destroy_vm(&name)
            .await
            .with_context(|| format!("deleting stemcell {}", name))?;
        Ok(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use flate2::{write::GzEncoder, Compression};
    use serde_json::json;

    use crate::action::{rpc, tests::Fixture};

    #[tokio::test]
    async fn test_stemcell_lifecycle() {
        let fixture = Fixture::new(false);
        let image = fixture.store.path().join("image");
        let mut builder = tar::Builder::new(GzEncoder::new(
            File::create(&image).unwrap(),
            Compression::default(),
        ));
        let contents: &[u8] = b"<Envelope/>";
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, "image.ovf", contents).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let response = fixture
            .call(
                "create_stemcell",
                json!([image, {"name": "bosh-vsphere-esxi-ubuntu-jammy-go_agent", "version": "1.5"}]),
            )
            .await;
        assert!(!response.is_error(), "{:?}", response.error);
        let cid = response.result.as_str().unwrap().to_string();

        let vmx = fixture
            .store
            .path()
            .join(format!("cs-{}", cid))
            .join(format!("cs-{}.vmx", cid));
        assert!(vmx.exists());
        let name = format!("--name=cs-{}", cid);
        assert_eq!(
            fixture.runner.count(&["--targetType=VMX", name.as_str()]),
            1
        );

        // VMs can be created from it
        let response = fixture
            .call(
                "create_vm",
                json!(["agent-1", cid, {}, {}, null, {}]),
            )
            .await;
        assert!(!response.is_error(), "{:?}", response.error);

        for _ in 0..2 {
            let response = fixture.call("delete_stemcell", json!([cid])).await;
            assert!(!response.is_error(), "{:?}", response.error);
        }
        assert!(!vmx.exists());
    }

    #[tokio::test]
    async fn test_create_stemcell_missing_image() {
        let fixture = Fixture::new(false);
        let response = fixture
            .call("create_stemcell", json!(["/nonexistent/image", {}]))
            .await;
        assert_eq!(response.error.unwrap().kind, rpc::CLOUD_ERROR);
    }
}
