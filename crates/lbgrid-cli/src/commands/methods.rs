pub fn methods() -> anyhow::Result<()> {
    let catalogue = lbgrid_haproxy::method_catalogue();
    println!("{}", serde_json::to_string_pretty(&catalogue)?);
    Ok(())
}
