use image_security_operator::resources::{ImageScanningRequest, ImageSigningRequest};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    for crd in [ImageSigningRequest::crd(), ImageScanningRequest::crd()] {
        println!("---");
        print!("{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
