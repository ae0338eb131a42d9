mod dynamics;
mod statics;
