use chatsync_channels::ChannelFactory;

pub fn cmd_channels() {
    for type_id in ChannelFactory::with_builtin().types() {
        println!("{type_id}");
    }
}
