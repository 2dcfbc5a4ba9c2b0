use kube::CustomResourceExt;

fn main() {
    println!("---");
    print!(
        "{}",
        serde_yaml::to_string(&webapp_operator::resources::WebApp::crd()).unwrap()
    );
}
